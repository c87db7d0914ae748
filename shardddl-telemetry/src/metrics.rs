use std::{sync::Mutex, time::Duration};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::trace;

/// Interval between two upkeep runs of the Prometheus recorder.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// The recorder is global and can only be installed once, but tests call the initializer
// repeatedly. A `Mutex` is used because the initialization is fallible.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the Prometheus recorder and returns a handle to render the collected metrics.
///
/// The hosting process decides where the rendered text is exposed. Subsequent calls return a
/// clone of the handle created by the first one. Must be called within a Tokio runtime, since an
/// upkeep task is spawned to bound the memory used by histograms.
pub fn init_metrics_handle(
    global_labels: &[(&str, &str)],
) -> Result<PrometheusHandle, BuildError> {
    let mut prometheus_handle = PROMETHEUS_HANDLE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(handle) = &*prometheus_handle {
        return Ok(handle.clone());
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in global_labels {
        builder = builder.add_global_label(*key, *value);
    }

    let handle = builder.install_recorder()?;
    *prometheus_handle = Some(handle.clone());

    let upkeep_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            upkeep_handle.run_upkeep();
        }
    });

    Ok(handle)
}
