use std::{io::Write, path::Path, sync::Arc};

use {
    anyhow::Result,
    clap::Args,
    courier_agents::{OpenAiCompatFactory, ThinkLevel},
    courier_auto_reply::{DispatchResult, DispatchStatus, Dispatcher},
    courier_common::types::InboundEvent,
    courier_metrics::{MetricsRecorderConfig, init_metrics},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::credentials_commands::build_pool;

#[derive(Args)]
pub struct AgentArgs {
    /// Message to send.
    #[arg(short, long)]
    message: String,
    /// Session key to use instead of the agent's main session.
    #[arg(long)]
    session: Option<String>,
    /// Agent id (defaults to `agents.defaults.id`).
    #[arg(long)]
    agent: Option<String>,
    /// Reasoning level for this turn: off, low, medium or high.
    #[arg(long)]
    thinking: Option<String>,
    /// Print reply blocks as they stream in.
    #[arg(long)]
    stream: bool,
    /// Print the full dispatch result as JSON.
    #[arg(long)]
    json: bool,
    /// Dump Prometheus metrics to stderr when done.
    #[arg(long)]
    print_metrics: bool,
}

pub async fn handle_agent(args: AgentArgs, config_path: Option<&Path>) -> Result<()> {
    let config = crate::load_config(config_path)?;
    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled || args.print_metrics,
        global_labels: config
            .metrics
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })?;

    // `--thinking` rides on the same directive a chat user would type.
    let body = match args.thinking.as_deref() {
        Some(level) => {
            let level: ThinkLevel = level.parse().map_err(anyhow::Error::msg)?;
            format!("++think {level}\n{}", args.message)
        },
        None => args.message.clone(),
    };

    let pool = build_pool(&config).await;
    let factory = Arc::new(OpenAiCompatFactory::from_config(&config)?);
    let dispatcher = Dispatcher::builder(config, factory, pool).build();

    let cancel = CancellationToken::new();
    let mut event = InboundEvent::cli(body).with_cancel(cancel.clone());
    event.session_key = args.session;
    event.agent_id = args.agent;
    if args.stream && !args.json {
        event = event.with_block_callback(Arc::new(|block: String| {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{block}\n");
            let _ = out.flush();
        }));
    }

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling turn");
                cancel.cancel();
            }
        })
    };
    let result = dispatcher.dispatch(event).await;
    interrupt.abort();
    dispatcher.shutdown().await;
    info!(status = ?result.status, "agent command finished");

    if args.print_metrics {
        eprintln!("{}", metrics.render());
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result, args.stream);
    }
    if result.status == DispatchStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_result(result: &DispatchResult, streamed: bool) {
    match result.status {
        DispatchStatus::Replied if streamed => {},
        DispatchStatus::Replied | DispatchStatus::Command => {
            if let Some(reply) = &result.reply {
                println!("{reply}");
            }
        },
        DispatchStatus::Failed => {
            if let Some(reply) = &result.reply {
                eprintln!("{reply}");
            }
        },
        DispatchStatus::Cancelled => eprintln!("Cancelled."),
        DispatchStatus::Empty => eprintln!("Nothing to send."),
        DispatchStatus::Duplicate | DispatchStatus::Queued => {},
    }
}
