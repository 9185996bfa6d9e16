use crate::agent_engine::history::AttemptRecord;
use crate::executor::command::ClickAction;
use crate::executor::coordinator::RelativePosition;

pub const PLANNER_SYSTEM_PROMPT: &str = "\
You steer a mouse pointer on a screenshot.

Rules:
- Coordinates are pixels in the screenshot you are shown, origin at the top-left.
- Reply with exactly one line in one of these forms and nothing else:
  move to (x, y)
  move to (x, y) and click
  move to (x, y) and double-click
  move to (x, y) and right-click
- The red ring marks the current pointer. Yellow crosses mark earlier attempts that missed.";

pub const VERIFIER_SYSTEM_PROMPT: &str = "\
You check screenshots of a desktop after a pointer action.
Reply ONLY with a JSON object: {\"confidence\": <0-100>, \"info\": \"<what you see>\"}.";

/// Named step sizes, in image pixels.
pub const DISTANCES: [(&str, u32); 7] = [
    ("tiny", 5),
    ("very small", 10),
    ("small", 20),
    ("medium", 50),
    ("large", 100),
    ("very large", 200),
    ("huge", 400),
];

/// Unit vectors in image space (y grows downwards).
pub const DIRECTIONS: [(&str, (i32, i32)); 8] = [
    ("up", (0, -1)),
    ("down", (0, 1)),
    ("left", (-1, 0)),
    ("right", (1, 0)),
    ("up-left", (-1, -1)),
    ("up-right", (1, -1)),
    ("down-left", (-1, 1)),
    ("down-right", (1, 1)),
];

/// First request for a command.
pub fn build_suggest_prompt(
    intent: &str,
    required_action: ClickAction,
    width: u32,
    height: u32,
    pointer: Option<(f64, f64)>,
) -> String {
    let pointer_line = match pointer {
        Some((x, y)) => format!("The pointer is currently at ({:.0}, {:.0}).\n", x, y),
        None => String::new(),
    };
    format!(
        "The screenshot is {width}x{height} pixels.\n{pointer_line}\
         Task: {intent}\n\n\
         Reply with the single command that does this, in the form '{}'.",
        required_action.template()
    )
}

/// Request a corrected command after `failed_command` failed with `reason`.
pub fn build_regenerate_prompt(
    intent: &str,
    required_action: ClickAction,
    failed_command: &str,
    reason: &str,
    width: u32,
    height: u32,
    attempts: &[AttemptRecord],
) -> String {
    let mut out = format!(
        "Regenerate the pointer command based strictly on the failed command: '{failed_command}'.\n\
         It failed because: {reason}\n\
         Task: {intent}\n\
         The screenshot is {width}x{height} pixels; x must be within 0..={width} and y within 0..={height}.\n\n"
    );

    if !attempts.is_empty() {
        out.push_str("Earlier attempts (numbered crosses on the image):\n");
        for (i, a) in attempts.iter().enumerate() {
            out.push_str(&format!(
                "  {}. ({:.0}, {:.0}) confidence {}: {}\n",
                i + 1,
                a.position.0,
                a.position.1,
                a.confidence,
                a.info
            ));
        }
        out.push('\n');
    }

    out.push_str("Step sizes: ");
    out.push_str(
        &DISTANCES
            .iter()
            .map(|(name, px)| format!("{name}={px}px"))
            .collect::<Vec<_>>()
            .join(", "),
    );
    out.push_str("\nDirections: ");
    out.push_str(
        &DIRECTIONS
            .iter()
            .map(|(name, (dx, dy))| format!("{name}=({dx}, {dy})"))
            .collect::<Vec<_>>()
            .join(", "),
    );
    out.push_str("\nAnchors: ");
    out.push_str(
        &RelativePosition::ALL
            .iter()
            .map(|p| {
                let (x, y) = p.resolve(width, height);
                format!("{}=({x}, {y})", p.name())
            })
            .collect::<Vec<_>>()
            .join(", "),
    );
    out.push_str(&format!(
        "\n\nReply with exactly one line of the form '{}'.",
        required_action.template()
    ));
    out
}

pub fn build_position_prompt(target: &str) -> String {
    format!(
        "Is '{target}' precisely marked by the red ring (the pointer)?\n\
         Reply with a JSON object containing:\n\
         - \"confidence\": a score between 0 and 100\n\
         - \"info\": what the pointer is actually on"
    )
}

pub fn build_outcome_prompt(expected_outcome: &str) -> String {
    format!(
        "Analyze if the following has happened:\n{expected_outcome}\n\n\
         Look for changes in the layout, new or vanished elements, and success messages.\n\n\
         Reply with a JSON object containing:\n\
         - \"completed\": true/false\n\
         - \"confidence\": 0-100\n\
         - \"info\": specific observations"
    )
}
