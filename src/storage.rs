use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::RecorderError;

/// Directorio concedido por el usuario para escribir exportaciones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryGrant {
    root: PathBuf,
}

impl DirectoryGrant {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Primitivas del host: permiso de directorio y creación de ficheros
pub trait StorageAccess: Send + Sync {
    /// Pide acceso a un directorio. `PermissionDenied` si no se concede,
    /// `UnsupportedPlatform` si el host no tiene la capacidad.
    fn request_directory(&self) -> Result<DirectoryGrant, RecorderError>;

    /// Crea un fichero nuevo dentro del directorio concedido
    fn create_file(
        &self,
        grant: &DirectoryGrant,
        file_name: &str,
        mime_type: &str,
    ) -> Result<Box<dyn Write + Send>, RecorderError>;

    /// Borra un fichero que no llegó a escribirse entero. Si ya no existe no
    /// es un error.
    fn discard(&self, grant: &DirectoryGrant, file_name: &str) -> Result<(), RecorderError>;

    /// Ruta visible del fichero creado, para informar al usuario
    fn location_of(&self, grant: &DirectoryGrant, file_name: &str) -> PathBuf {
        grant.root().join(file_name)
    }
}

/// Directorio local del sistema de ficheros actuando como ubicación concedida
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    root: PathBuf,
    create_missing: bool,
}

impl LocalDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            create_missing: true,
        }
    }

    /// No crea el directorio: si falta, el permiso se deniega
    pub fn existing(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            create_missing: false,
        }
    }
}

impl StorageAccess for LocalDirectory {
    fn request_directory(&self) -> Result<DirectoryGrant, RecorderError> {
        if !self.root.exists() {
            if !self.create_missing {
                return Err(RecorderError::PermissionDenied(format!(
                    "{} does not exist",
                    self.root.display()
                )));
            }
            fs::create_dir_all(&self.root).map_err(|e| {
                RecorderError::PermissionDenied(format!("{}: {}", self.root.display(), e))
            })?;
            log::info!("Created export directory {}", self.root.display());
        }

        let metadata = fs::metadata(&self.root).map_err(|e| {
            RecorderError::PermissionDenied(format!("{}: {}", self.root.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(RecorderError::PermissionDenied(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        if metadata.permissions().readonly() {
            return Err(RecorderError::PermissionDenied(format!(
                "{} is read-only",
                self.root.display()
            )));
        }

        Ok(DirectoryGrant {
            root: self.root.clone(),
        })
    }

    fn create_file(
        &self,
        grant: &DirectoryGrant,
        file_name: &str,
        mime_type: &str,
    ) -> Result<Box<dyn Write + Send>, RecorderError> {
        let path = grant.root().join(file_name);
        log::debug!("Creating {} ({})", path.display(), mime_type);
        let file: File = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn discard(&self, grant: &DirectoryGrant, file_name: &str) -> Result<(), RecorderError> {
        let path = grant.root().join(file_name);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("Discarded {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RecorderError::WriteFailure(e)),
        }
    }
}
