//! JSON rendering of room views.
//!
//! Each event carries `{"template", "path", "state"}` on a single line, so
//! the client picks the component to redraw from `template`.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use sizeit_live::{BoxError, Renderer, RoomView};

#[derive(Serialize)]
struct Envelope<'a> {
    template: &'a str,
    path: &'a str,
    state: &'a RoomView<'a>,
}

/// Renders views as compact JSON.
#[derive(Debug, Clone, Default)]
pub struct JsonRenderer {
    base_path: String,
}

impl JsonRenderer {
    #[must_use]
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

impl Renderer for JsonRenderer {
    fn render(&self, template: &str, view: &RoomView<'_>) -> Result<Bytes, BoxError> {
        let mut buf = BytesMut::with_capacity(512).writer();
        serde_json::to_writer(
            &mut buf,
            &Envelope {
                template,
                path: &self.base_path,
                state: view,
            },
        )?;
        Ok(buf.into_inner().freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sizeit_live::room::Room;

    #[test]
    fn test_envelope() {
        let room = Room::new("core", Vec::new());
        let view = RoomView::build("s-1", &room, None);

        let bytes = JsonRenderer::new("/size-it")
            .render("components/results", &view)
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["template"], "components/results");
        assert_eq!(json["path"], "/size-it");
        assert_eq!(json["state"]["session_id"], "s-1");
        assert_eq!(json["state"]["ticket"]["sizing_type"], "STORY_POINTS");
        assert!(!bytes.contains(&b'\n'));
    }
}
