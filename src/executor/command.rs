//! The `move to (x, y) [and <action>]` command language spoken between the
//! oracle and the executor.
//!
//! Four forms are accepted, case-insensitively:
//!
//! ```text
//! move to (x, y)
//! move to (x, y) and click
//! move to (x, y) and double-click
//! move to (x, y) and right-click
//! ```
//!
//! `x` and `y` are 1–4 digit non-negative integers in image space. Anything
//! else is a [`SteadyhandError::MalformedCommand`]; a well-formed command whose
//! coordinates leave the bounding box is a [`SteadyhandError::OutOfBounds`].
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{SteadyhandError, SteadyhandResult};
use crate::executor::input::MouseButton;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickAction {
    None,
    Click,
    DoubleClick,
    RightClick,
}

impl ClickAction {
    fn from_suffix(suffix: Option<&str>) -> Self {
        match suffix.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("click") => ClickAction::Click,
            Some("double-click") => ClickAction::DoubleClick,
            Some("right-click") => ClickAction::RightClick,
            _ => ClickAction::None,
        }
    }

    fn suffix(self) -> Option<&'static str> {
        match self {
            ClickAction::None => None,
            ClickAction::Click => Some("click"),
            ClickAction::DoubleClick => Some("double-click"),
            ClickAction::RightClick => Some("right-click"),
        }
    }

    /// The command shape carrying this action, e.g. `move to (x, y) and click`.
    pub fn template(self) -> String {
        match self.suffix() {
            Some(s) => format!("move to (x, y) and {s}"),
            None => "move to (x, y)".to_string(),
        }
    }

    /// Button and double flag for the executor, `None` for a plain move.
    pub fn button(self) -> Option<(MouseButton, bool)> {
        match self {
            ClickAction::None => None,
            ClickAction::Click => Some((MouseButton::Left, false)),
            ClickAction::DoubleClick => Some((MouseButton::Left, true)),
            ClickAction::RightClick => Some((MouseButton::Right, false)),
        }
    }
}

/// A validated pointer command in image space. Only [`CommandGrammar`] builds these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    x: u32,
    y: u32,
    action: ClickAction,
}

impl Command {
    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn action(&self) -> ClickAction {
        self.action
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "move to ({}, {})", self.x, self.y)?;
        if let Some(suffix) = self.action.suffix() {
            write!(f, " and {suffix}")?;
        }
        Ok(())
    }
}

/// Inclusive bounding box `0 <= x <= width, 0 <= y <= height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub width: u32,
    pub height: u32,
}

fn strict_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?i)move\s+to\s+\(\s*(\d{1,4})\s*,\s*(\d{1,4})\s*\)(?:\s+and\s+(click|double-click|right-click))?$",
        )
        .ok()
    })
    .as_ref()
}

fn lenient_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)move(?:\s+(?:the\s+)?(?:cursor|mouse))?\s+to\s*\(?\s*(\d+)\s*,\s*(\d+)\s*\)?(?:\s+and\s+(double-click|right-click|click))?",
        )
        .ok()
    })
    .as_ref()
}

#[derive(Debug, Clone, Copy)]
pub struct CommandGrammar {
    bounds: Bounds,
}

impl CommandGrammar {
    pub fn new(bounds: Bounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Parse then validate.
    pub fn accept(&self, input: &str) -> SteadyhandResult<Command> {
        let command = self.parse(input)?;
        self.validate(command)
    }

    /// Grammar check only; the bounding box is not consulted.
    pub fn parse(&self, input: &str) -> SteadyhandResult<Command> {
        let trimmed = input.trim();
        if trimmed.contains('\n') {
            return Err(SteadyhandError::MalformedCommand(input.to_string()));
        }
        let caps = strict_pattern()
            .and_then(|re| re.captures(trimmed))
            .ok_or_else(|| SteadyhandError::MalformedCommand(input.to_string()))?;

        // 1-4 digits always fit in u32.
        let x = caps[1]
            .parse::<u32>()
            .map_err(|_| SteadyhandError::MalformedCommand(input.to_string()))?;
        let y = caps[2]
            .parse::<u32>()
            .map_err(|_| SteadyhandError::MalformedCommand(input.to_string()))?;
        let action = ClickAction::from_suffix(caps.get(3).map(|m| m.as_str()));
        Ok(Command { x, y, action })
    }

    pub fn validate(&self, command: Command) -> SteadyhandResult<Command> {
        if command.x > self.bounds.width || command.y > self.bounds.height {
            return Err(SteadyhandError::OutOfBounds {
                x: command.x,
                y: command.y,
                width: self.bounds.width,
                height: self.bounds.height,
            });
        }
        Ok(command)
    }

    /// Pull the first command-shaped fragment out of free text and restate it
    /// in canonical form. The result still has to pass [`Self::accept`].
    pub fn extract(text: &str) -> Option<String> {
        text.lines().find_map(|line| {
            let caps = lenient_pattern()?.captures(line)?;
            let mut out = format!("move to ({}, {})", &caps[1], &caps[2]);
            if let Some(action) = caps.get(3) {
                out.push_str(" and ");
                out.push_str(&action.as_str().to_ascii_lowercase());
            }
            Some(out)
        })
    }
}
