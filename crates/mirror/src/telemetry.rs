//! Logging initialisation for the mirror daemon.
//!
//! The daemon tails well in `journald`/docker logs, so the human-readable
//! format is compact single-line output without targets; `LOG_FORMAT=json`
//! switches to JSON for log shippers.  The default filter keeps the mirror
//! loops at `info` while capping the HTTP stack underneath the IPFS client,
//! whose connection chatter would otherwise dominate every poll tick.
//!
//! | Variable     | Values              | Default                        |
//! |-------------|---------------------|--------------------------------|
//! | `RUST_LOG`  | tracing filter spec | `info,hyper=warn,reqwest=warn` |
//! | `LOG_FORMAT`| `json` \| `compact` | `compact`                      |

use tracing_subscriber::EnvFilter;

/// Default filter: mirror loops at `info`, HTTP client internals capped.
const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// Initialise the global tracing subscriber.
///
/// Call **once** at the very start of `main`, before any other code runs,
/// so that every log event is captured by the configured subscriber.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match std::env::var("LOG_FORMAT")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "json" => builder.json().init(),
        _ => builder.compact().with_target(false).init(),
    }
}
