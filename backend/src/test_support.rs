use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

pub const BOUNDARY: &str = "----detector-test-boundary";

pub fn multipart_content_type() -> (&'static str, String) {
    (
        "content-type",
        format!("multipart/form-data; boundary={}", BOUNDARY),
    )
}

/// Multipart body with the given text fields followed by an optional file part.
pub fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, data)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn png_bytes() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbImage::from_pixel(16, 16, Rgb([200, 10, 10]))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
