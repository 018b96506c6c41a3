//! Small images that pass signature sniffing, tagged with a marker the fake
//! inference service uses to pick its reply.

/// A test image with the content type and file name it is uploaded under.
#[derive(Debug, Clone)]
pub struct ImageFixture {
    pub file_name: &'static str,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// JPEG-looking bytes of roughly `size` bytes, carrying `marker`.
pub fn jpeg(marker: &str, size: usize) -> ImageFixture {
    let mut bytes = JPEG_MAGIC.to_vec();
    bytes.extend_from_slice(marker.as_bytes());
    if bytes.len() < size {
        bytes.resize(size, 0);
    }
    ImageFixture {
        file_name: "leaf.jpg",
        content_type: "image/jpeg",
        bytes,
    }
}

pub fn png(marker: &str) -> ImageFixture {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend_from_slice(marker.as_bytes());
    ImageFixture {
        file_name: "leaf.png",
        content_type: "image/png",
        bytes,
    }
}

/// A text file renamed to `.jpg` and declared as plain text.
pub fn renamed_text_file() -> ImageFixture {
    ImageFixture {
        file_name: "notes.jpg",
        content_type: "text/plain",
        bytes: b"shopping list: seeds, compost".to_vec(),
    }
}

pub const HEALTHY_TOMATO: &str = r#"{"subject":"Tomato","findings":[{"label":"Healthy","confidence":0.95,"remedy":"None"}]}"#;

pub const BLIGHTED_POTATO: &str = r#"{"subject":"Potato","findings":[{"label":"Late blight","confidence":0.82,"remedy":"Apply a copper-based fungicide"},{"label":"Early blight","confidence":0.12,"remedy":"Remove infected leaves"}]}"#;
