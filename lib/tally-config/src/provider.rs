use std::path::Path;

use figment::{
    providers::{Format, Yaml},
    value::{Dict, Map},
    Error, Metadata, Profile, Provider,
};

/// A YAML file provider whose contents are read once, up front.
///
/// `figment`'s own file providers silently treat a missing file as empty, which hides typos in `--config` paths. This
/// provider surfaces the I/O error instead.
pub struct FileProvider {
    data: Map<Profile, Dict>,
    metadata: Metadata,
}

impl FileProvider {
    pub fn from_yaml(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let data = Yaml::string(&contents).data()?;

        Ok(Self {
            data,
            metadata: Metadata::from("YAML file", path),
        })
    }
}

impl Provider for FileProvider {
    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        Ok(self.data.clone())
    }
}
