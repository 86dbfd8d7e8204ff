//! `canopy watch`: stream realtime changes until interrupted.

use std::sync::Arc;

use chrono::Utc;
use owo_colors::OwoColorize;
use tokio::sync::mpsc;

use canopy_core::{
    ChangeEvent, ChangeKind, ConnectionState, FarmConfig, RealtimeBackend, RealtimeTransport,
    Subscription, SubscriptionRegistry, sync_channels,
};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(config: &FarmConfig, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let available = sync_channels(config);
    if let Some(unknown) = args
        .tables
        .iter()
        .find(|t| !available.iter().any(|spec| &spec.table == *t))
    {
        let names: Vec<_> = available.iter().map(|s| s.table.as_str()).collect();
        return Err(CliError::Validation {
            field: "table".into(),
            reason: format!("unknown table '{unknown}' (expected one of: {})", names.join(", ")),
        });
    }
    let specs: Vec<_> = available
        .into_iter()
        .filter(|spec| args.tables.is_empty() || args.tables.contains(&spec.table))
        .collect();

    let transport: Arc<dyn RealtimeTransport> = Arc::new(RealtimeBackend::connect(config));
    let registry = SubscriptionRegistry::new(Arc::clone(&transport));

    let (tx, mut rx) = mpsc::unbounded_channel::<ChangeEvent>();
    let subscriptions: Vec<Subscription> = specs
        .into_iter()
        .map(|spec| {
            let tx = tx.clone();
            registry.subscribe(spec, move |event| {
                let _ = tx.send(event.clone());
            })
        })
        .collect();
    drop(tx);

    let color = output::stdout_color(&global.color);
    let mut state = transport.connection_state();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            biased;
            _ = &mut ctrl_c => break Ok(()),
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = state.borrow_and_update().clone();
                if !global.quiet {
                    eprintln!("realtime: {current}");
                }
                if current == ConnectionState::Failed {
                    break Err(CliError::ConnectionFailed {
                        url: config.url.to_string(),
                        reason: "realtime feed gave up reconnecting".into(),
                    });
                }
            }
            event = rx.recv() => match event {
                Some(event) => output::print_output(&render_event(&event, &global.output, color), false),
                None => break Ok(()),
            },
        }
    };

    drop(subscriptions);
    registry.close_all();
    transport.shutdown();
    result
}

fn render_event(event: &ChangeEvent, format: &OutputFormat, color: bool) -> String {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => {
            serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
        }
        OutputFormat::Yaml => format!("---\n{}", output::render_yaml(event).trim_end()),
        OutputFormat::Plain => format!(
            "{} {} {}",
            event.kind,
            event.table,
            event.record_id().map(|id| id.to_string()).unwrap_or_default()
        ),
        OutputFormat::Table => {
            let at = event.timestamp.unwrap_or_else(Utc::now).format("%H:%M:%S");
            let kind = event.kind.to_string();
            let kind = match (color, event.kind) {
                (false, _) => kind,
                (true, ChangeKind::Insert) => kind.green().to_string(),
                (true, ChangeKind::Update) => kind.yellow().to_string(),
                (true, ChangeKind::Delete) => kind.red().to_string(),
            };
            let id = event
                .record_id()
                .map_or_else(|| "-".to_owned(), |id| id.to_string());
            let name = event
                .new
                .as_ref()
                .and_then(|n| n.get("name").or_else(|| n.get("entity_id")))
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            format!("{at}  {kind:<6}  {:<18}  {id}  {name}", event.table)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_event_names_kind_table_and_id() {
        let event = ChangeEvent {
            kind: ChangeKind::Delete,
            table: "racks".into(),
            new: None,
            old: Some(json!({ "id": "rack-7" })),
            timestamp: None,
        };
        assert_eq!(render_event(&event, &OutputFormat::Plain, false), "DELETE racks rack-7");
    }

    #[test]
    fn table_event_shows_record_name() {
        let event = ChangeEvent {
            kind: ChangeKind::Insert,
            table: "shelves".into(),
            new: Some(json!({ "id": "s-1", "name": "Shelf 4" })),
            old: None,
            timestamp: None,
        };
        let line = render_event(&event, &OutputFormat::Table, false);
        assert!(line.contains("INSERT"));
        assert!(line.ends_with("s-1  Shelf 4"));
    }
}
