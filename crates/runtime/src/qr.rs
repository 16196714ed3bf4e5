//! QR rendering for pairing payloads.

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    qrcode::{QrCode, render::svg},
};

/// Render a pairing payload as a `data:image/svg+xml;base64,` URL the
/// dashboard can drop straight into an `<img>` tag.
pub fn to_data_url(payload: &str) -> anyhow::Result<String> {
    let code = QrCode::new(payload.as_bytes())?;
    let image = code
        .render()
        .min_dimensions(256, 256)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", BASE64.encode(image)))
}
