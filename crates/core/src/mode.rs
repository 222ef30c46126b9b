//! Tutoring Modes
//!
//! A session is always in exactly one of four modes. Any mode may hand off to
//! any other (including itself); the only way to move between them is the
//! switch tool, and a session starts in [`Mode::Greeter`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Human-readable list of the valid mode names, used in error messages and prompts.
pub const VALID_MODES: &str = "greeter, learn, quiz, teach_back";

/// One of the four conversational personas.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Welcomes the user and routes them to a teaching mode.
    #[default]
    Greeter,
    /// Explains a concept.
    Learn,
    /// Asks the concept's sample question.
    Quiz,
    /// The user explains the concept back; the tutor compares against the reference.
    TeachBack,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Greeter, Mode::Learn, Mode::Quiz, Mode::TeachBack];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Greeter => "greeter",
            Mode::Learn => "learn",
            Mode::Quiz => "quiz",
            Mode::TeachBack => "teach_back",
        }
    }

    /// Resolves `requested` to the next mode.
    ///
    /// The transition graph is complete, so the current mode never restricts
    /// the target; it only matters that the name is valid. On error the
    /// caller keeps `self` as the active mode.
    pub fn transition(self, requested: &str) -> Result<Mode, ModeError> {
        requested.parse()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ModeError;

    /// Case-insensitive; `-` and spaces count as `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        match normalized.as_str() {
            "greeter" => Ok(Mode::Greeter),
            "learn" => Ok(Mode::Learn),
            "quiz" => Ok(Mode::Quiz),
            "teach_back" => Ok(Mode::TeachBack),
            _ => Err(ModeError::Unknown {
                requested: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModeError {
    #[error("Unknown mode '{requested}'. Valid modes are: {}.", VALID_MODES)]
    Unknown { requested: String },
}

/// A completed transfer of the session from one persona to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Handoff {
    pub from: Mode,
    pub to: Mode,
}
