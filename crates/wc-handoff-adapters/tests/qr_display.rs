use wc_handoff_adapters::{svg_from_data_url, QrDisplayAdapter};
use wc_handoff_core::{DisplayPort, PortError, QrOptions};

const URI: &str = "wc:7f6e5d4c@2?relay-protocol=irn&symKey=0123456789abcdef";

#[test]
fn pairing_uri_renders_as_svg_data_url() {
    let artifact = QrDisplayAdapter
        .render(URI, &QrOptions::default())
        .expect("render");

    assert_eq!(artifact.mime_type, "image/svg+xml");
    assert!(artifact.data_url.starts_with("data:image/svg+xml;base64,"));
    let svg = svg_from_data_url(&artifact.data_url).expect("decode");
    assert!(svg.contains("<svg"));
    assert!(svg.contains("#000000"));
    assert!(svg.contains("#FFFFFF"));
}

#[test]
fn custom_colors_are_applied() {
    let options = QrOptions {
        dark: "#123456".to_owned(),
        light: "#fafafa".to_owned(),
        ..QrOptions::default()
    };
    let svg = QrDisplayAdapter.svg(URI, &options).expect("render");
    assert!(svg.contains("#123456"));
    assert!(svg.contains("#fafafa"));
}

#[test]
fn same_uri_renders_identically() {
    let a = QrDisplayAdapter.render(URI, &QrOptions::default()).expect("a");
    let b = QrDisplayAdapter.render(URI, &QrOptions::default()).expect("b");
    assert_eq!(a, b);
}

#[test]
fn empty_or_oversized_uri_is_rejected() {
    let err = QrDisplayAdapter
        .render("   ", &QrOptions::default())
        .expect_err("empty");
    assert!(matches!(err, PortError::Validation(_)));

    let huge = format!("wc:{}", "a".repeat(8_000));
    let err = QrDisplayAdapter
        .render(&huge, &QrOptions::default())
        .expect_err("too long for a QR code");
    assert!(matches!(err, PortError::Validation(m) if m.contains("QR generation failed")));
}

#[test]
fn foreign_data_url_is_not_decoded() {
    assert!(svg_from_data_url("data:image/png;base64,AAAA").is_err());
}
