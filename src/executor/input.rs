// Surface capabilities and the enigo-backed desktop implementation.
use async_trait::async_trait;
use enigo::{Button, Coordinate, Direction, Enigo, Keyboard, Mouse, Settings};
use serde::{Deserialize, Serialize};

use crate::errors::{SteadyhandError, SteadyhandResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    fn to_enigo(self) -> Button {
        match self {
            MouseButton::Left => Button::Left,
            MouseButton::Right => Button::Right,
            MouseButton::Middle => Button::Middle,
        }
    }
}

/// Absolute pointer placement in surface pixels.
#[async_trait]
pub trait Movable: Send + Sync {
    async fn move_to(&self, x: i32, y: i32) -> bool;
}

/// A single click at the current pointer position.
#[async_trait]
pub trait Clickable: Send + Sync {
    async fn click(&self, button: MouseButton) -> bool;
}

/// The surface's own idea of where the pointer is.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn position(&self) -> Option<(i32, i32)>;
}

#[async_trait]
pub trait Typeable: Send + Sync {
    async fn type_text(&self, text: &str) -> bool;
}

/// Everything the motion executor needs from a surface.
pub trait Pointer: Movable + Clickable + PositionSource {}

impl<T: Movable + Clickable + PositionSource + ?Sized> Pointer for T {}

/// The local desktop, driven through enigo.
///
/// enigo handles are opened per call on the blocking pool so the surface stays
/// `Send + Sync` regardless of the platform backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopSurface;

impl DesktopSurface {
    /// Fails early when no input connection can be opened (no display, missing permissions).
    pub async fn connect() -> SteadyhandResult<Self> {
        with_enigo(|_| Ok(())).await?;
        Ok(Self)
    }

    /// Main display size in pixels.
    pub async fn size(&self) -> SteadyhandResult<(u32, u32)> {
        let (w, h) = with_enigo(|enigo| enigo.main_display().map_err(|e| format!("{e:?}"))).await?;
        if w <= 0 || h <= 0 {
            return Err(SteadyhandError::ActuationFailure(format!(
                "display reported non-positive size {w}x{h}"
            )));
        }
        Ok((w as u32, h as u32))
    }
}

async fn with_enigo<T, F>(f: F) -> SteadyhandResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Enigo) -> Result<T, String> + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || {
        let mut enigo = Enigo::new(&Settings::default()).map_err(|e| format!("{e:?}"))?;
        f(&mut enigo)
    })
    .await
    .map_err(|e| SteadyhandError::ActuationFailure(format!("input task panicked: {e}")))?;
    joined.map_err(SteadyhandError::ActuationFailure)
}

#[async_trait]
impl Movable for DesktopSurface {
    async fn move_to(&self, x: i32, y: i32) -> bool {
        match with_enigo(move |enigo| {
            enigo
                .move_mouse(x, y, Coordinate::Abs)
                .map_err(|e| format!("{e:?}"))
        })
        .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(x, y, error = %e, "desktop move failed");
                false
            }
        }
    }
}

#[async_trait]
impl Clickable for DesktopSurface {
    async fn click(&self, button: MouseButton) -> bool {
        match with_enigo(move |enigo| {
            enigo
                .button(button.to_enigo(), Direction::Click)
                .map_err(|e| format!("{e:?}"))
        })
        .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(?button, error = %e, "desktop click failed");
                false
            }
        }
    }
}

#[async_trait]
impl PositionSource for DesktopSurface {
    async fn position(&self) -> Option<(i32, i32)> {
        with_enigo(|enigo| enigo.location().map_err(|e| format!("{e:?}")))
            .await
            .map_err(|e| tracing::debug!(error = %e, "cursor location unavailable"))
            .ok()
    }
}

#[async_trait]
impl Typeable for DesktopSurface {
    async fn type_text(&self, text: &str) -> bool {
        let text = text.to_string();
        let chars = text.chars().count();
        match with_enigo(move |enigo| enigo.text(&text).map_err(|e| format!("{e:?}"))).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(chars, error = %e, "desktop typing failed");
                false
            }
        }
    }
}
