/// Step names exposed to the orchestrator and the CLI.
/// These are fixed: staged artifacts, metrics labels and reports all key off them.
pub const FETCH_DATA: &str = "fetch_data";
pub const CLEAN_DATA: &str = "clean_data";
pub const TRANSFORM_DATA: &str = "transform_data";
pub const LOAD_RELATIONAL: &str = "load_relational";
pub const LOAD_DOCUMENTS: &str = "load_documents";
pub const RUN_ANALYTICS: &str = "run_analytics";
pub const GENERATE_HTML_REPORT: &str = "generate_html_report";

/// All pipeline steps in dependency order
pub fn all_steps() -> Vec<&'static str> {
    vec![
        FETCH_DATA,
        CLEAN_DATA,
        TRANSFORM_DATA,
        LOAD_RELATIONAL,
        LOAD_DOCUMENTS,
        RUN_ANALYTICS,
        GENERATE_HTML_REPORT,
    ]
}

// Staging keys (one JSON artifact per key per run)
pub const RAW_BATCH_KEY: &str = "raw_batch";
pub const CLEAN_OUTPUT_KEY: &str = "clean_output";
pub const CLEAN_REPORT_KEY: &str = "clean_report";
pub const TRANSFORM_OUTPUT_KEY: &str = "transform_output";
pub const RELATIONAL_LOAD_KEY: &str = "load_relational_report";
pub const DOCUMENT_LOAD_KEY: &str = "load_documents_report";
pub const ANALYTICS_KEY: &str = "analytics";
pub const REPORT_ARTIFACTS_KEY: &str = "report_artifacts";
pub const STEP_LOG_KEY: &str = "step_log";
pub const RUN_CONTEXT_KEY: &str = "run_context";

// Store labels used in load reports and metrics
pub const RELATIONAL_STORE: &str = "relational";
pub const DOCUMENT_STORE: &str = "document";

pub const DEFAULT_DAG_ID: &str = "meetingbank_etl_pipeline";
pub const DEFAULT_COLLECTION: &str = "meetings";
pub const DEFAULT_REPORT_NAME: &str = "meetingbank_report";
pub const DEFAULT_DETAILED_REPORT_NAME: &str = "meetingbank_detailed_report";

/// MongoDB's BSON document limit; kept as the ceiling for the document collection.
pub const MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

/// Fallbacks for optional fields
pub const UNKNOWN_CITY: &str = "Unknown";
pub const UNKNOWN_SPEAKER: &str = "Unknown";
pub const UNKNOWN_SOURCE: &str = "unknown";
