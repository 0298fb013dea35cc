//! Console transport
//!
//! An interactive read-eval loop over any async reader/writer pair, and a
//! one-shot prompt. Both render turn events as they arrive.

use futures::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::event::{EventStream, TurnEvent};
use crate::runtime::AgentRuntime;

const PROMPT: &str = "You: ";
const EXIT_WORDS: [&str; 3] = ["exit", "quit", "bye"];

/// Run an interactive session until the input ends or the user exits.
///
/// The session is created up front and removed on the way out. Turn
/// failures are rendered and the loop carries on.
pub async fn run_loop<R, W>(
    runtime: &AgentRuntime,
    user_id: &str,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (session_id, _) = runtime
        .create_or_get_session(runtime.app_name(), user_id, None)
        .await?;
    write(
        &mut output,
        &format!("--- Session Initialized (ID: {}) ---\n", session_id),
    )
    .await?;
    write(&mut output, "Type 'exit' to end the session.\n").await?;

    let mut lines = input.lines();
    loop {
        write(&mut output, PROMPT).await?;
        let Some(line) = lines.next_line().await? else {
            write(&mut output, "\n").await?;
            break;
        };
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&line.to_lowercase().as_str()) {
            write(&mut output, "Ending session.\n").await?;
            break;
        }

        match line {
            "/tools" => render_tools(runtime, &mut output).await?,
            "/reconnect" => match runtime.reconnect_tools().await {
                Ok(()) => write(&mut output, "Tool server reconnected.\n").await?,
                Err(e) => write(&mut output, &format!("Reconnect failed: {}\n", e)).await?,
            },
            text => match runtime.submit_turn(&session_id, user_id, text).await {
                Ok(stream) => {
                    render(stream, &mut output).await?;
                    write(&mut output, "--- Turn ended ---\n").await?;
                }
                Err(e) => write(&mut output, &format!("Error: {}\n", e)).await?,
            },
        }
    }

    runtime.end_session(&session_id).await;
    tracing::debug!(session = %session_id, "Console session closed");
    Ok(())
}

/// Send a single prompt in a fresh session and render the reply.
/// Returns `false` if the turn ended with an error.
pub async fn ask<W>(runtime: &AgentRuntime, user_id: &str, prompt: &str, mut output: W) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let (session_id, _) = runtime
        .create_or_get_session(runtime.app_name(), user_id, None)
        .await?;
    let result = async {
        let stream = runtime.submit_turn(&session_id, user_id, prompt).await?;
        render(stream, &mut output).await
    }
    .await;
    runtime.end_session(&session_id).await;
    result
}

/// Write each event as it arrives. Returns `false` on a failed turn.
pub async fn render<W>(mut stream: EventStream, output: &mut W) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let mut ok = true;
    while let Some(event) = stream.next().await {
        if let TurnEvent::TurnEnded { error: Some(_) } = &event {
            ok = false;
        }
        if let Some(line) = format_event(&event) {
            write(output, &line).await?;
        }
    }
    Ok(ok)
}

fn format_event(event: &TurnEvent) -> Option<String> {
    match event {
        TurnEvent::TextFragment { text } => Some(format!("Agent: {}\n", text)),
        TurnEvent::ToolCallStarted { name, args, .. } => {
            Some(format!("  [tool] {} {}\n", name, args))
        }
        TurnEvent::ToolCallResult {
            name,
            error: Some(failure),
            ..
        } => Some(format!("  [tool] {} failed: {}\n", name, failure.message)),
        TurnEvent::ToolCallResult { name, .. } => Some(format!("  [tool] {} done\n", name)),
        TurnEvent::TurnEnded { error: Some(failure) } => {
            Some(format!("Error ({:?}): {}\n", failure.kind, failure.message))
        }
        TurnEvent::TurnEnded { error: None } => None,
    }
}

async fn render_tools<W: AsyncWrite + Unpin>(runtime: &AgentRuntime, output: &mut W) -> Result<()> {
    match runtime.list_capabilities().await {
        Ok(tools) if tools.is_empty() => write(output, "No tools available.\n").await,
        Ok(tools) => {
            let mut text = String::from("Available tools:\n");
            for tool in tools {
                text.push_str(&format!("  - {}\n", tool));
            }
            write(output, &text).await
        }
        Err(e) => write(output, &format!("Tools unavailable: {}\n", e)).await,
    }
}

async fn write<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
