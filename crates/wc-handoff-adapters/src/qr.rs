use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use qrcode::render::svg;
use qrcode::QrCode;
use tracing::debug;

use wc_handoff_core::{DisplayArtifact, DisplayPort, PortError, QrOptions};

pub const SVG_MIME: &str = "image/svg+xml";

/// Renders pairing URIs as SVG QR codes wrapped in a data URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrDisplayAdapter;

impl QrDisplayAdapter {
    /// Raw SVG document for `uri`. The quiet zone is on whenever `margin` is non-zero.
    pub fn svg(&self, uri: &str, options: &QrOptions) -> Result<String, PortError> {
        if uri.trim().is_empty() {
            return Err(PortError::Validation("pairing URI is empty".to_owned()));
        }
        let code = QrCode::new(uri.as_bytes())
            .map_err(|e| PortError::Validation(format!("QR generation failed: {e}")))?;
        Ok(code
            .render::<svg::Color>()
            .min_dimensions(options.width, options.width)
            .quiet_zone(options.margin > 0)
            .dark_color(svg::Color(&options.dark))
            .light_color(svg::Color(&options.light))
            .build())
    }
}

impl DisplayPort for QrDisplayAdapter {
    fn render(&self, uri: &str, options: &QrOptions) -> Result<DisplayArtifact, PortError> {
        let svg = self.svg(uri, options)?;
        debug!(bytes = svg.len(), width = options.width, "pairing QR rendered");
        Ok(DisplayArtifact {
            mime_type: SVG_MIME.to_owned(),
            data_url: format!("data:{SVG_MIME};base64,{}", STANDARD.encode(svg)),
        })
    }
}

/// Decode the SVG text back out of a data URL produced by `render`.
pub fn svg_from_data_url(data_url: &str) -> Result<String, PortError> {
    let encoded = data_url
        .strip_prefix(&format!("data:{SVG_MIME};base64,"))
        .ok_or_else(|| PortError::Validation("not an SVG data URL".to_owned()))?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| PortError::Validation(format!("data URL decode failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| PortError::Validation(format!("SVG is not UTF-8: {e}")))
}
