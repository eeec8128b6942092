use std::io;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Events from our own crates pass at `level`, everything else at WARN.
/// Output goes to stderr so stdout stays free for sampled data.
pub(crate) fn setup_tracing(level: Level) {
    let filter_layer = tracing_subscriber::filter::filter_fn(move |metadata| {
        let effective_level = if is_procgraph_target(metadata.target()) {
            level
        } else {
            Level::WARN
        };
        metadata.level() <= &effective_level
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter_layer))
        .init();
}

fn is_procgraph_target(target: &str) -> bool {
    target.starts_with("procgraph")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_targets_are_recognized() {
        assert!(is_procgraph_target("procgraph_core::plan"));
        assert!(is_procgraph_target("procgraph::headless"));
        assert!(!is_procgraph_target("rayon_core::registry"));
    }
}
