// File payloads (avatars, task photos) and task answers

use serde::Serialize;

/// A file handed in by the user, kept in memory until uploaded
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            bytes,
        }
    }

    /// Extension taken from the file name, used when building storage keys.
    /// Anything but a plain ASCII alphanumeric extension becomes `bin`.
    pub fn extension(&self) -> &str {
        match self.file_name.rsplit_once('.') {
            Some((_, ext))
                if !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                ext
            }
            _ => "bin",
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// What the user submitted for a task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskAnswer {
    None,
    Text(String),
    Photo(UploadFile),
}

/// Summary of an upload returned to the caller
#[derive(Debug, Clone, Serialize)]
pub struct UploadedObject {
    pub key: String,
    pub public_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(UploadFile::new("me.png", "image/png", vec![1]).extension(), "png");
        assert_eq!(UploadFile::new("archive.tar.gz", "x", vec![1]).extension(), "gz");
        assert_eq!(UploadFile::new("noext", "x", vec![1]).extension(), "bin");
        assert_eq!(UploadFile::new("dot.", "x", vec![1]).extension(), "bin");
    }

    #[test]
    fn test_extension_cannot_leave_the_key() {
        assert_eq!(UploadFile::new("a./../other/x", "x", vec![1]).extension(), "bin");
        assert_eq!(UploadFile::new("a.png/../../x", "x", vec![1]).extension(), "bin");
        assert_eq!(UploadFile::new("a.p%2Fng", "x", vec![1]).extension(), "bin");
        assert_eq!(UploadFile::new("a.jpeg", "x", vec![1]).extension(), "jpeg");
    }
}
