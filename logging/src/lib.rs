// Copyright (c) 2021-2025 RBB S.r.l
// opensource@mintlayer.org
// SPDX-License-Identifier: MIT
// Licensed under the MIT License;
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://github.com/mintlayer/mintlayer-core/blob/master/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod log_style;
mod utils;

pub use log;
/// For spans that give `log` records emitted inside them some context.
pub use tracing;

pub use log_style::{get_log_style_from_env, LogStyle, LogStyleParseError, TextColoring};
pub use utils::{get_from_env, GetFromEnvError};

use tracing_subscriber::{fmt, EnvFilter};

/// Env var holding the log filter, e.g. `info,component_runtime=debug`.
pub const LOG_FILTER_ENV_VAR: &str = "RUST_LOG";

/// Env var selecting the output style, see [`LogStyle`].
pub const LOG_STYLE_ENV_VAR: &str = "COMPONENT_RUNTIME_LOG_STYLE";

const DEFAULT_LOG_FILTER: &str = "info";

static INITIALIZE_LOGGER_ONCE_FLAG: std::sync::Once = std::sync::Once::new();

/// Install the process-wide logger. Calling it more than once is harmless.
pub fn init_logging() {
    INITIALIZE_LOGGER_ONCE_FLAG.call_once(|| {
        let style = match get_log_style_from_env(LOG_STYLE_ENV_VAR) {
            Ok(style) => style.unwrap_or(LogStyle::Text(TextColoring::Auto)),
            Err(err) => {
                eprintln!("Ignoring {LOG_STYLE_ENV_VAR}: {err}");
                LogStyle::Text(TextColoring::Auto)
            }
        };
        init_with_style(style);
    });
}

fn make_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn init_with_style(style: LogStyle) {
    // `try_init` also bridges `log` records into tracing. It fails only if another global
    // subscriber has already been installed, e.g. by the embedding application.
    let result = match style {
        LogStyle::Json => fmt().json().with_env_filter(make_filter()).try_init(),
        LogStyle::Text(coloring) => {
            let ansi = match coloring {
                TextColoring::On => true,
                TextColoring::Off => false,
                TextColoring::Auto => std::io::IsTerminal::is_terminal(&std::io::stderr()),
            };
            fmt()
                .with_ansi(ansi)
                .with_writer(std::io::stderr)
                .with_env_filter(make_filter())
                .try_init()
        }
    };

    if let Err(err) = result {
        eprintln!("Logger not installed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_twice() {
        init_logging();
        init_logging();
        let _span = tracing::debug_span!("test", name = "initialize_twice").entered();
        log::debug!("logger initialized");
    }
}
