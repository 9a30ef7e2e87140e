//! Local filesystem `BlobContainer`.
//!
//! Writes go through a temp file followed by either a rename or a hard
//! link, generalized to streaming input of a declared length and to the
//! store's two flavors of fail-if-exists writes.
//! `write_blob_atomic(.., fail_if_exists = true)` is
//! the local-disk analogue of an object store's conditional put: we write to
//! a private temp file, then publish it with a hard link (which fails if the
//! target name is already taken) instead of a rename (which would silently
//! overwrite).

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rand::Rng;

use super::{BlobContainer, BlobMetadata, ListResult};

#[derive(Clone)]
pub struct FsBlobContainer {
    base_path: PathBuf,
}

impl FsBlobContainer {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)
            .with_context(|| format!("creating repository path {:?}", base_path))?;
        Ok(Self { base_path })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    fn temp_path(&self) -> PathBuf {
        let suffix: u64 = rand::thread_rng().gen();
        self.base_path.join(format!(".tmp-{:016x}", suffix))
    }

    fn write_to_temp(&self, data: &mut dyn Read, length: u64) -> Result<PathBuf> {
        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path)
            .with_context(|| format!("creating temp file {:?}", temp_path))?;
        let written = io::copy(&mut data.take(length), &mut file)
            .with_context(|| format!("writing temp file {:?}", temp_path))?;
        file.sync_all().ok();
        if written != length {
            let _ = fs::remove_file(&temp_path);
            bail!(
                "declared length {} does not match {} bytes actually written",
                length,
                written
            );
        }
        Ok(temp_path)
    }
}

impl BlobContainer for FsBlobContainer {
    fn read_blob(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.path_for(name);
        let file =
            File::open(&path).with_context(|| format!("reading blob {:?}", path))?;
        Ok(Box::new(file))
    }

    fn write_blob(
        &self,
        name: &str,
        data: &mut dyn Read,
        length: u64,
        fail_if_exists: bool,
    ) -> Result<()> {
        let path = self.path_for(name);
        let mut options = OpenOptions::new();
        options.write(true);
        if fail_if_exists {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        let mut file = options
            .open(&path)
            .with_context(|| format!("opening blob {:?}", path))?;
        let written = io::copy(&mut data.take(length), &mut file)
            .with_context(|| format!("writing blob {:?}", path))?;
        if written != length {
            bail!(
                "declared length {} does not match {} bytes actually written for {:?}",
                length,
                written,
                path
            );
        }
        Ok(())
    }

    fn write_blob_atomic(
        &self,
        name: &str,
        data: &mut dyn Read,
        length: u64,
        fail_if_exists: bool,
    ) -> Result<()> {
        let temp_path = self.write_to_temp(data, length)?;
        let target = self.path_for(name);

        let result = if fail_if_exists {
            fs::hard_link(&temp_path, &target)
        } else {
            fs::rename(&temp_path, &target)
        };

        match result {
            Ok(()) => {
                let _ = fs::remove_file(&temp_path);
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                if fail_if_exists && err.kind() == io::ErrorKind::AlreadyExists {
                    bail!("blob {:?} already exists", target);
                }
                Err(err).with_context(|| format!("publishing blob {:?}", target))
            }
        }
    }

    fn list_blobs_by_prefix(&self, prefix: &str) -> Result<ListResult> {
        let mut entries = BTreeMap::new();
        let dir = match fs::read_dir(&self.base_path) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(ListResult::Entries(entries))
            }
            Err(err) => return Err(err).context("listing blobs"),
        };
        for entry in dir {
            let entry = entry?;
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            if !name.starts_with(prefix) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            entries.insert(name.to_string(), BlobMetadata { length: meta.len() });
        }
        Ok(ListResult::Entries(entries))
    }

    fn delete_blob_ignore_missing(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context("deleting blob"),
        }
    }

    fn blob_exists(&self, name: &str) -> Result<bool> {
        Ok(self.path_for(name).exists())
    }

    fn delete_container(&self) -> Result<()> {
        match fs::remove_dir_all(&self.base_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).context("deleting container"),
        }
    }

    fn child(&self, relative: &str) -> Result<Arc<dyn BlobContainer>> {
        Ok(Arc::new(FsBlobContainer::new(self.base_path.join(relative))?))
    }
}
