use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use log::*;

use crate::errors::*;

/// An uploaded file reduced to its bytes plus the metadata the uploader declared.
///
/// The buffer is shared and immutable, cloning an artifact never copies content.
#[derive(Clone, Debug)]
pub struct Artifact {
    bytes: Arc<[u8]>,
    name: Option<String>,
    media_type: Option<String>,
}

impl Artifact {
    pub fn from_bytes<B: Into<Vec<u8>>>(bytes: B) -> Artifact {
        let bytes: Vec<u8> = bytes.into();
        return Artifact {
            bytes: Arc::from(bytes),
            name: None,
            media_type: None,
        };
    }

    pub fn from_path(path: &Path) -> Result<Artifact> {
        debug!("Reading artifact from {:?}", path);
        let bytes = fs::read(path)
            .chain_err(|| ErrorKind::ArtifactError(format!("Could not read file {:?}", path)))?;
        let artifact = Artifact::from_bytes(bytes);
        return Ok(match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => artifact.with_name(name),
            None => artifact,
        });
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Artifact> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)
            .chain_err(|| ErrorKind::ArtifactError(String::from("Could not read upload stream")))?;
        return Ok(Artifact::from_bytes(bytes));
    }

    pub fn with_name(mut self, name: &str) -> Artifact {
        self.name = Some(String::from(name));
        return self;
    }

    pub fn with_media_type(mut self, media_type: &str) -> Artifact {
        self.media_type = Some(String::from(media_type));
        return self;
    }

    pub fn bytes(&self) -> &[u8] {
        return &self.bytes;
    }

    pub fn len(&self) -> usize {
        return self.bytes.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.bytes.is_empty();
    }

    pub fn name(&self) -> Option<&str> {
        return self.name.as_deref();
    }

    /// Declared media type, lower-cased and without parameters.
    pub fn media_type(&self) -> Option<String> {
        return self.media_type.as_ref().map(|m| {
            m.split(';').next().unwrap_or("").trim().to_lowercase()
        });
    }

    /// Lower-cased substring after the final dot of the declared name.
    pub fn extension(&self) -> Option<String> {
        let name = self.name.as_ref()?;
        let dot = name.rfind('.')?;
        return Some(name[dot + 1..].to_lowercase());
    }
}
