//! Structured logging initialisation for the coordinator.
//!
//! Reads `RUST_LOG` for the filter and `LOG_FORMAT` to choose the output
//! format.  Both environment variables are optional.  sqlx logs every
//! statement at `info`, which drowns the workflow transitions the operator
//! actually cares about, so the default filter caps it at `warn`.
//!
//! | Variable     | Values              | Default            |
//! |-------------|---------------------|--------------------|
//! | `RUST_LOG`  | tracing filter spec | `info,sqlx=warn`   |
//! | `LOG_FORMAT`| `json` \| `pretty`  | `pretty`           |

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter: workflow at `info`, sqlx statement logging capped.
const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Initialise the global tracing subscriber.
///
/// Call **once** at the very start of `main`, before any other code runs,
/// so that every log event is captured by the configured subscriber.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match std::env::var("LOG_FORMAT")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init(),
    }
}
