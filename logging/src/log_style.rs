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

use std::str::FromStr;

use crate::utils::{get_from_env, GetFromEnvError};

/// Whether text output uses ANSI colors; `Auto` colors only when stderr is a terminal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TextColoring {
    On,
    Off,
    Auto,
}

/// Output format of the runtime's log lines.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogStyle {
    Text(TextColoring),
    Json,
}

impl FromStr for LogStyle {
    type Err = LogStyleParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let style = match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogStyle::Json,
            "text" => LogStyle::Text(TextColoring::Auto),
            "text-colored" => LogStyle::Text(TextColoring::On),
            "text-uncolored" => LogStyle::Text(TextColoring::Off),
            _ => return Err(LogStyleParseError::Unrecognized(value.to_owned())),
        };
        Ok(style)
    }
}

/// The style named by `var_name`, or `None` if the variable is not set.
pub fn get_log_style_from_env(var_name: &str) -> Result<Option<LogStyle>, LogStyleParseError> {
    get_from_env(var_name)?.as_deref().map(LogStyle::from_str).transpose()
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LogStyleParseError {
    #[error("Unknown log style '{0}', expected text, text-colored, text-uncolored or json")]
    Unrecognized(String),
    #[error(transparent)]
    Env(#[from] GetFromEnvError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_styles() {
        let cases = [
            ("text", LogStyle::Text(TextColoring::Auto)),
            (" Text-Colored", LogStyle::Text(TextColoring::On)),
            ("TEXT-uncolored", LogStyle::Text(TextColoring::Off)),
            ("jSoN", LogStyle::Json),
        ];
        for (value, style) in cases {
            assert_eq!(value.parse::<LogStyle>(), Ok(style), "{value}");
        }
    }

    #[test]
    fn unknown_style() {
        assert_eq!(
            "xml".parse::<LogStyle>(),
            Err(LogStyleParseError::Unrecognized("xml".to_owned()))
        );
    }

    #[test]
    fn unset_env_var() {
        let result = get_log_style_from_env("COMPONENT_RUNTIME_LOG_STYLE_TEST_UNSET_VAR");
        assert_eq!(result, Ok(None));
    }
}
