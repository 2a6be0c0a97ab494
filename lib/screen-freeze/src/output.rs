use crate::{Error, Result, transform::Transform};
use std::fmt;
use wayland_client::{Proxy, protocol::wl_output};
use wayland_protocols::xdg::xdg_output::zv1::client::zxdg_output_v1;

/// Handle of an output, stable for the lifetime of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputId(pub(crate) usize);

/// Area of an output in compositor logical units
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug)]
pub struct Output {
    pub(crate) wl_output: wl_output::WlOutput,
    pub(crate) xdg_output: Option<zxdg_output_v1::ZxdgOutputV1>,

    pub(crate) name: Option<String>,
    pub(crate) position: Option<(i32, i32)>,
    pub(crate) logical_size: Option<(i32, i32)>,
    pub(crate) transform: Transform,
}

impl Output {
    pub(crate) fn new(wl_output: wl_output::WlOutput) -> Self {
        Self {
            wl_output,
            xdg_output: None,
            name: None,
            position: None,
            logical_size: None,
            transform: Transform::Normal,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Logical geometry, once the compositor has reported it
    pub fn geometry(&self) -> Option<Rectangle> {
        let (width, height) = self.logical_size?;
        let (x, y) = self.position.unwrap_or_default();

        Some(Rectangle {
            x,
            y,
            width,
            height,
        })
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub(crate) fn destroy(self) {
        if let Some(xdg_output) = self.xdg_output {
            xdg_output.destroy();
        }

        if self.wl_output.version() >= 3 {
            self.wl_output.release();
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.geometry() {
            Some(r) => write!(
                f,
                "{} {}x{}+{}+{} {:?}",
                self.name(),
                r.width,
                r.height,
                r.x,
                r.y,
                self.transform
            ),
            None => write!(f, "{} (no geometry)", self.name()),
        }
    }
}

/// Pick outputs by name.
///
/// Without a `wanted` name every output is selected, in enumeration order.
pub fn select_outputs<'a>(
    names: impl IntoIterator<Item = &'a str>,
    wanted: Option<&str>,
) -> Result<Vec<OutputId>> {
    let ids = names.into_iter().enumerate();

    match wanted {
        None => Ok(ids.map(|(index, _)| OutputId(index)).collect()),
        Some(wanted) => ids
            .filter(|(_, name)| *name == wanted)
            .map(|(index, _)| OutputId(index))
            .next()
            .map(|id| vec![id])
            .ok_or_else(|| Error::NoOutput(wanted.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: [&str; 3] = ["OUT-1", "HDMI-A-1", "eDP-1"];

    #[test]
    fn test_select_all() {
        let ids = select_outputs(NAMES, None).unwrap();
        assert_eq!(ids, vec![OutputId(0), OutputId(1), OutputId(2)]);
    }

    #[test]
    fn test_select_by_name() {
        let ids = select_outputs(NAMES, Some("HDMI-A-1")).unwrap();
        assert_eq!(ids, vec![OutputId(1)]);
    }

    #[test]
    fn test_select_missing() {
        match select_outputs(NAMES, Some("DP-9")) {
            Err(Error::NoOutput(name)) => assert_eq!(name, "DP-9"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_select_from_nothing() {
        assert!(select_outputs([], None).unwrap().is_empty());
        assert!(select_outputs([], Some("OUT-1")).is_err());
    }
}
