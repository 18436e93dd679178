use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

use board_onboarding::config::ControllerConfig;
use board_onboarding::onboarding::{
    AlwaysActive, ControllerView, ConversationPhase, HttpOnboardingApi, OnboardingApi,
    OnboardingController, ParsedMessage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let board_id = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ONBOARDING_BOARD_ID").ok())
        .context("usage: board-onboarding <board-id> (or set ONBOARDING_BOARD_ID)")?;

    let http = HttpOnboardingApi::from_env()?;
    let controller_config = ControllerConfig::from_env()?;

    eprintln!("📋 Board onboarding v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: {}", http.base_url());
    eprintln!("   Board: {}", board_id);
    eprintln!("   Poll interval: {:?}", controller_config.poll_interval);
    eprintln!("   Pick an option by number, or type an answer.");
    eprintln!("   /confirm to accept the draft goal, /retry after an error, /quit to exit.\n");

    let api: Arc<dyn OnboardingApi> = Arc::new(http);
    let (confirmed_tx, mut confirmed_rx) = oneshot::channel();

    let controller = OnboardingController::mount(
        board_id,
        api,
        Arc::new(AlwaysActive),
        controller_config,
        move || {
            let _ = confirmed_tx.send(());
        },
    )
    .await;

    // Render every view change.
    let mut views = controller.subscribe();
    let renderer = tokio::spawn(async move {
        let mut last_rendered: Option<ControllerView> = None;
        loop {
            let view = views.borrow_and_update().clone();
            if last_rendered.as_ref() != Some(&view) {
                render(&view, last_rendered.as_ref());
                last_rendered = Some(view);
            }
            if views.changed().await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = &mut confirmed_rx => {
                eprintln!("\n✅ Board goal confirmed.");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match handle_input(&controller, line).await {
                    Err(e) if e.is_retryable() => eprintln!("⚠️  {e} (type /retry)"),
                    Err(e) => eprintln!("⚠️  {e}"),
                    Ok(()) => {}
                }
                if line == "/quit" {
                    break;
                }
            }
        }
    }

    controller.shutdown().await;
    renderer.abort();
    Ok(())
}

async fn handle_input(
    controller: &OnboardingController,
    line: &str,
) -> Result<(), board_onboarding::error::OnboardingError> {
    match line {
        "/quit" => Ok(()),
        "/confirm" => controller.confirm_goal().await,
        "/retry" => controller.retry().await,
        "/refresh" => controller.refresh().await,
        _ => {
            let options = controller
                .view()
                .message
                .map(|m| m.options().to_vec())
                .unwrap_or_default();
            match line.parse::<usize>() {
                Ok(n) if n >= 1 && n <= options.len() => {
                    controller.select_option(&options[n - 1]).await?;
                    controller.submit_selection().await
                }
                _ => controller.submit_free_text(line).await,
            }
        }
    }
}

fn render(view: &ControllerView, previous: Option<&ControllerView>) {
    let phase_changed = previous.is_none_or(|p| p.phase != view.phase);
    let message_changed = previous.is_none_or(|p| p.message != view.message);

    if let Some(err) = view.error.as_ref() {
        if previous.is_none_or(|p| p.error.as_ref() != Some(err)) {
            eprintln!("❌ {} (type /retry)", err.message);
        }
    }
    if view.reconnecting && previous.is_none_or(|p| !p.reconnecting) {
        eprintln!("… reconnecting");
    }

    match view.phase {
        ConversationPhase::AwaitingUserAnswer if phase_changed || message_changed => {
            if let Some(message) = view.message.as_ref() {
                print_message(message);
            }
            if let Some(goal) = view.draft_goal.as_ref() {
                println!("\nDraft goal:");
                if let Some(objective) = goal.objective.as_deref() {
                    println!("  Objective: {objective}");
                }
                if let Some(date) = goal.target_date.as_deref() {
                    println!("  Target date: {date}");
                }
                println!("Type /confirm to accept.");
            }
        }
        ConversationPhase::AwaitingAssistant if phase_changed => eprintln!("… waiting for the assistant"),
        ConversationPhase::Starting if phase_changed => eprintln!("… starting onboarding"),
        _ => {}
    }
}

fn print_message(message: &ParsedMessage) {
    println!("\n{}", message.text());
    for (i, option) in message.options().iter().enumerate() {
        println!("  {}. {}", i + 1, option);
    }
}
