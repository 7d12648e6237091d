//! Prometheus metrics for the ruo orchestrator.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::model::Direction;
use crate::upgrade::StageType;

/// Labels for plan start requests.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PlanLabels {
    pub cluster_name: String,
    pub direction: String,
    pub result: String,
}

/// Labels for compile duration.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CompileLabels {
    pub cluster_name: String,
    pub direction: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StageLabels {
    pub stage_type: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    pub cluster_name: String,
    pub outcome: String,
}

/// Labels for abort/retry/delete calls.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ControlLabels {
    pub cluster_name: String,
    pub action: String,
    pub result: String,
}

/// All Prometheus metrics for the orchestrator.
pub struct Metrics {
    pub plan_requests_total: Family<PlanLabels, Counter>,
    pub plan_compile_duration_seconds: Family<CompileLabels, Histogram>,
    pub stages_compiled_total: Family<StageLabels, Counter>,
    pub config_reconcile_total: Family<ReconcileLabels, Counter>,
    pub plan_control_total: Family<ControlLabels, Counter>,
}

/// Compiles are in-memory walks; large packs with many hosts reach seconds.
const COMPILE_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

impl Metrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let plan_requests_total = Family::<PlanLabels, Counter>::default();
        registry.register(
            "ruo_plan_requests",
            "Total number of plan start requests",
            plan_requests_total.clone(),
        );

        let plan_compile_duration_seconds =
            Family::<CompileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(COMPILE_BUCKETS.iter().copied())
            });
        registry.register(
            "ruo_plan_compile_duration_seconds",
            "Duration of successful plan compiles in seconds",
            plan_compile_duration_seconds.clone(),
        );

        let stages_compiled_total = Family::<StageLabels, Counter>::default();
        registry.register(
            "ruo_stages_compiled",
            "Total number of stages compiled, by stage type",
            stages_compiled_total.clone(),
        );

        let config_reconcile_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "ruo_config_reconcile",
            "Total number of configuration reconciliations, by outcome",
            config_reconcile_total.clone(),
        );

        let plan_control_total = Family::<ControlLabels, Counter>::default();
        registry.register(
            "ruo_plan_control",
            "Total number of abort, retry and delete calls",
            plan_control_total.clone(),
        );

        Self {
            plan_requests_total,
            plan_compile_duration_seconds,
            stages_compiled_total,
            config_reconcile_total,
            plan_control_total,
        }
    }

    pub fn record_plan_request(&self, cluster_name: &str, direction: Direction, result: &str) {
        self.plan_requests_total
            .get_or_create(&PlanLabels {
                cluster_name: cluster_name.to_string(),
                direction: direction.to_string(),
                result: result.to_string(),
            })
            .inc();
    }

    pub fn observe_compile(&self, cluster_name: &str, direction: Direction, seconds: f64) {
        self.plan_compile_duration_seconds
            .get_or_create(&CompileLabels {
                cluster_name: cluster_name.to_string(),
                direction: direction.to_string(),
            })
            .observe(seconds);
    }

    pub fn record_stage(&self, stage_type: StageType) {
        self.stages_compiled_total
            .get_or_create(&StageLabels {
                stage_type: stage_type.to_string(),
            })
            .inc();
    }

    pub fn record_reconcile(&self, cluster_name: &str, outcome: &str) {
        self.config_reconcile_total
            .get_or_create(&ReconcileLabels {
                cluster_name: cluster_name.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_control(&self, cluster_name: &str, action: &str, result: &str) {
        self.plan_control_total
            .get_or_create(&ControlLabels {
                cluster_name: cluster_name.to_string(),
                action: action.to_string(),
                result: result.to_string(),
            })
            .inc();
    }
}

/// Axum handler that encodes the registry as OpenMetrics text.
async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut buf = String::new();
    if encode(&mut buf, &registry).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics".to_string(),
        );
    }
    (StatusCode::OK, buf)
}

/// Start the metrics server on the given port.
pub async fn serve(port: u16, registry: Arc<Registry>) -> anyhow::Result<()> {
    use axum::Router;
    use axum::routing::get;
    use tokio::net::TcpListener;
    use tracing::info;

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);

    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("Metrics server listening on port {}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
