//! Host file store
//!
//! The provisioning directory is the database. Every artifact belonging to a
//! host is named after its identifier:
//!
//! - `<mac>.ipxe` boot menu, copied from `<server_name>-<os>.ipxe`
//! - `<mac>.conf` decoded installer answer file
//! - `<mac>.disklabel_template` optional disk layout
//! - `<mac>.tgz` uploaded install package
//!
//! A host is registered exactly when its `.ipxe` file exists. Nothing is
//! rolled back: a failed multi-step write leaves whatever was already written,
//! and a later delete removes it.

use crate::error::StoreError;
use base64::Engine;
use netbootd_common::{is_package_filename, is_valid_mac, Error, HostIdentifier, OsKind};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info};

type Result<T> = std::result::Result<T, StoreError>;

const BOOT_MENU_EXT: &str = ".ipxe";

/// Suffix of in-flight uploads, which are also dot-prefixed
const PARTIAL_EXT: &str = ".part";

/// Owner and group read/write, nothing for others
const PRIVATE_FILE_MODE: u32 = 0o660;

/// Directory-backed host store
#[derive(Debug, Clone)]
pub struct HostFileStore {
    dir: PathBuf,
    server_name: String,
}

impl HostFileStore {
    /// Create a store over `dir`. `server_name` selects which OS boot menu
    /// templates are used (`<server_name>-<os>.ipxe`).
    pub fn new(dir: impl Into<PathBuf>, server_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            server_name: server_name.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn template_path(&self, os: OsKind) -> PathBuf {
        self.dir.join(format!("{}-{}{}", self.server_name, os, BOOT_MENU_EXT))
    }

    pub fn boot_menu_path(&self, id: &HostIdentifier) -> PathBuf {
        self.dir.join(format!("{}{}", id, BOOT_MENU_EXT))
    }

    pub fn answer_file_path(&self, id: &HostIdentifier) -> PathBuf {
        self.dir.join(format!("{}.conf", id))
    }

    pub fn disklabel_template_path(&self, id: &HostIdentifier) -> PathBuf {
        self.dir.join(format!("{}.disklabel_template", id))
    }

    /// Copy the OS boot menu template to `<id>.ipxe`
    pub async fn materialize_boot_menu(&self, id: &HostIdentifier, os: OsKind) -> Result<u64> {
        let src = self.template_path(os);
        let dst = self.boot_menu_path(id);
        let bytes = copy_file(&dst, &src).await?;
        debug!(src = %src.display(), dst = %dst.display(), bytes, "Boot menu materialized");
        Ok(bytes)
    }

    /// Decode `payload` and write it to `<id>.conf`
    ///
    /// Malformed base64 fails before anything is written.
    pub async fn write_answer_file(&self, id: &HostIdentifier, payload: &str) -> Result<usize> {
        let decoded = base64::engine::general_purpose::STANDARD.decode(payload)?;
        let path = self.answer_file_path(id);
        write_private(&path, &decoded).await?;
        debug!(path = %path.display(), bytes = decoded.len(), "Answer file written");
        Ok(decoded.len())
    }

    /// Write `<id>.disklabel_template` if `text` is non-empty.
    ///
    /// Returns whether a file was written.
    pub async fn write_disklabel_template(&self, id: &HostIdentifier, text: &str) -> Result<bool> {
        if text.is_empty() {
            return Ok(false);
        }
        let path = self.disklabel_template_path(id);
        let mut contents = String::with_capacity(text.len() + 1);
        contents.push_str(text);
        contents.push('\n');
        write_private(&path, contents.as_bytes()).await?;
        debug!(path = %path.display(), "Disklabel template written");
        Ok(true)
    }

    /// Identifiers of all registered hosts, in directory order
    pub async fn list_host_identifiers(&self) -> Result<Vec<String>> {
        let mut hosts = Vec::new();
        for name in self.scan().await? {
            if let Some(stem) = name.strip_suffix(BOOT_MENU_EXT) {
                if is_valid_mac(stem) {
                    hosts.push(stem.to_string());
                }
            }
        }
        Ok(hosts)
    }

    /// Remove every file whose name starts with `id`, ignoring case.
    ///
    /// Returns the names removed; an empty list is not an error.
    pub async fn delete_host_files(&self, id: &HostIdentifier) -> Result<Vec<String>> {
        let prefix = id.folded();
        let matching: Vec<String> = self
            .scan()
            .await?
            .into_iter()
            .filter(|name| name.to_lowercase().starts_with(&prefix))
            .collect();

        let mut deleted = Vec::with_capacity(matching.len());
        for name in matching {
            let path = self.dir.join(&name);
            fs::remove_file(&path)
                .await
                .map_err(|e| StoreError::io(&path, e))?;
            debug!(path = %path.display(), "Removed host file");
            deleted.push(name);
        }
        Ok(deleted)
    }

    /// Stream an uploaded package into the directory.
    ///
    /// Only `<mac>.tgz` names are accepted; anything else is rejected before
    /// the filesystem is touched. The data lands in a hidden `.part` file
    /// that replaces `<filename>` only once the whole stream was read, so a
    /// failed upload leaves any previous package intact.
    pub async fn store_package<R>(&self, filename: &str, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if !is_package_filename(filename) {
            return Err(Error::IllegalFilename(filename.to_string()).into());
        }

        let path = self.dir.join(filename);
        let partial = self.dir.join(format!(".{}{}", filename, PARTIAL_EXT));
        let bytes = match write_stream(&partial, reader).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        fs::rename(&partial, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        info!(path = %path.display(), bytes, "Package stored");
        Ok(bytes)
    }

    /// One pass over the directory, returning UTF-8 entry names
    async fn scan(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

async fn write_stream<R>(path: &Path, reader: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    let bytes = tokio::io::copy(reader, &mut file)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    file.flush().await.map_err(|e| StoreError::io(path, e))?;
    Ok(bytes)
}

/// Copy `src` to `dst`, truncating `dst`. Destination first, always.
pub async fn copy_file(dst: &Path, src: &Path) -> Result<u64> {
    let mut src_file = fs::File::open(src)
        .await
        .map_err(|e| StoreError::io(src, e))?;
    let mut dst_file = fs::File::create(dst)
        .await
        .map_err(|e| StoreError::io(dst, e))?;
    let bytes = tokio::io::copy(&mut src_file, &mut dst_file)
        .await
        .map_err(|e| StoreError::io(dst, e))?;
    dst_file.flush().await.map_err(|e| StoreError::io(dst, e))?;
    Ok(bytes)
}

async fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(PRIVATE_FILE_MODE)
        .open(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    file.flush().await.map_err(|e| StoreError::io(path, e))?;

    // The creation mode is filtered by the umask; pin it explicitly
    fs::set_permissions(path, std::fs::Permissions::from_mode(PRIVATE_FILE_MODE))
        .await
        .map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    fn id(s: &str) -> HostIdentifier {
        HostIdentifier::parse(s).unwrap()
    }

    fn sorted(mut v: Vec<String>) -> Vec<String> {
        v.sort();
        v
    }

    #[test]
    fn test_paths() {
        let store = HostFileStore::new("/var/www/netboot", "netboot");
        assert_eq!(
            store.template_path(OsKind::Debian),
            PathBuf::from("/var/www/netboot/netboot-debian.ipxe")
        );
        assert_eq!(
            store.boot_menu_path(&id(MAC)),
            PathBuf::from("/var/www/netboot/AA:BB:CC:DD:EE:FF.ipxe")
        );
        assert_eq!(
            store.answer_file_path(&id(MAC)),
            PathBuf::from("/var/www/netboot/AA:BB:CC:DD:EE:FF.conf")
        );
        assert_eq!(
            store.disklabel_template_path(&id(MAC)),
            PathBuf::from("/var/www/netboot/AA:BB:CC:DD:EE:FF.disklabel_template")
        );
    }

    #[tokio::test]
    async fn test_materialize_copies_template() {
        let tmp = tempdir().unwrap();
        let template = "#!ipxe\nchain http://boot/debian\n";
        std::fs::write(tmp.path().join("netboot-debian.ipxe"), template).unwrap();

        let store = HostFileStore::new(tmp.path(), "netboot");
        let bytes = store.materialize_boot_menu(&id(MAC), OsKind::Debian).await.unwrap();

        assert_eq!(bytes, template.len() as u64);
        let copied = std::fs::read_to_string(tmp.path().join("AA:BB:CC:DD:EE:FF.ipxe")).unwrap();
        assert_eq!(copied, template);
        // Template is untouched
        let original = std::fs::read_to_string(tmp.path().join("netboot-debian.ipxe")).unwrap();
        assert_eq!(original, template);
    }

    #[tokio::test]
    async fn test_materialize_missing_template() {
        let tmp = tempdir().unwrap();
        let store = HostFileStore::new(tmp.path(), "netboot");

        let err = store
            .materialize_boot_menu(&id(MAC), OsKind::Openbsd)
            .await
            .unwrap_err();
        match err {
            StoreError::Io { path, .. } => {
                assert_eq!(path, tmp.path().join("netboot-openbsd.ipxe"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!tmp.path().join("AA:BB:CC:DD:EE:FF.ipxe").exists());
    }

    #[tokio::test]
    async fn test_answer_file_decoded_with_private_mode() {
        let tmp = tempdir().unwrap();
        let store = HostFileStore::new(tmp.path(), "netboot");

        let written = store.write_answer_file(&id(MAC), "aGVsbG8=").await.unwrap();
        assert_eq!(written, 5);

        let path = tmp.path().join("AA:BB:CC:DD:EE:FF.conf");
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);
    }

    #[tokio::test]
    async fn test_answer_file_bad_base64_writes_nothing() {
        let tmp = tempdir().unwrap();
        let store = HostFileStore::new(tmp.path(), "netboot");

        let err = store.write_answer_file(&id(MAC), "not base64!").await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
        assert!(!tmp.path().join("AA:BB:CC:DD:EE:FF.conf").exists());
    }

    #[tokio::test]
    async fn test_disklabel_template() {
        let tmp = tempdir().unwrap();
        let store = HostFileStore::new(tmp.path(), "netboot");

        assert!(!store.write_disklabel_template(&id(MAC), "").await.unwrap());
        assert!(!tmp.path().join("AA:BB:CC:DD:EE:FF.disklabel_template").exists());

        assert!(store.write_disklabel_template(&id(MAC), "/ 1G-*").await.unwrap());
        let contents =
            std::fs::read_to_string(tmp.path().join("AA:BB:CC:DD:EE:FF.disklabel_template"))
                .unwrap();
        assert_eq!(contents, "/ 1G-*\n");
    }

    #[tokio::test]
    async fn test_list_only_boot_menus() {
        let tmp = tempdir().unwrap();
        for name in [
            "AA:BB:CC:DD:EE:FF.ipxe",
            "AA:BB:CC:DD:EE:FF.conf",
            "00:11:22:33:44:55.ipxe",
            "netboot-debian.ipxe",
            "11:22:33:44:55:66.tgz",
            "README",
        ] {
            std::fs::write(tmp.path().join(name), "x").unwrap();
        }
        let store = HostFileStore::new(tmp.path(), "netboot");

        let hosts = sorted(store.list_host_identifiers().await.unwrap());
        assert_eq!(hosts, vec!["00:11:22:33:44:55", "AA:BB:CC:DD:EE:FF"]);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_error() {
        let tmp = tempdir().unwrap();
        let store = HostFileStore::new(tmp.path().join("missing"), "netboot");
        assert!(matches!(
            store.list_host_identifiers().await,
            Err(StoreError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_case_insensitive_prefix() {
        let tmp = tempdir().unwrap();
        for name in [
            "AA:BB:CC:DD:EE:FF.ipxe",
            "AA:BB:CC:DD:EE:FF.conf",
            "aa:bb:cc:dd:ee:ff.tgz",
            "00:11:22:33:44:55.ipxe",
            "netboot-debian.ipxe",
        ] {
            std::fs::write(tmp.path().join(name), "x").unwrap();
        }
        let store = HostFileStore::new(tmp.path(), "netboot");

        let deleted = sorted(store.delete_host_files(&id("aa:bb:cc:dd:ee:ff")).await.unwrap());
        assert_eq!(
            deleted,
            vec![
                "AA:BB:CC:DD:EE:FF.conf",
                "AA:BB:CC:DD:EE:FF.ipxe",
                "aa:bb:cc:dd:ee:ff.tgz"
            ]
        );
        assert!(tmp.path().join("00:11:22:33:44:55.ipxe").exists());
        assert!(tmp.path().join("netboot-debian.ipxe").exists());
    }

    #[tokio::test]
    async fn test_delete_nothing_matches() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("00:11:22:33:44:55.ipxe"), "x").unwrap();
        let store = HostFileStore::new(tmp.path(), "netboot");

        let deleted = store.delete_host_files(&id(MAC)).await.unwrap();
        assert!(deleted.is_empty());
        assert!(tmp.path().join("00:11:22:33:44:55.ipxe").exists());
    }

    #[tokio::test]
    async fn test_store_package() {
        let tmp = tempdir().unwrap();
        let store = HostFileStore::new(tmp.path(), "netboot");
        let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();

        let mut reader = payload.as_slice();
        let bytes = store
            .store_package("aa:bb:cc:dd:ee:ff.tgz", &mut reader)
            .await
            .unwrap();

        assert_eq!(bytes, payload.len() as u64);
        let stored = std::fs::read(tmp.path().join("aa:bb:cc:dd:ee:ff.tgz")).unwrap();
        assert_eq!(stored, payload);
    }

    struct ResetReader;

    impl AsyncRead for ResetReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::other("connection reset")))
        }
    }

    #[tokio::test]
    async fn test_store_package_failed_stream_keeps_previous() {
        use tokio::io::AsyncReadExt;

        let tmp = tempdir().unwrap();
        let store = HostFileStore::new(tmp.path(), "netboot");
        let pkg = tmp.path().join("aa:bb:cc:dd:ee:ff.tgz");
        std::fs::write(&pkg, "old package").unwrap();

        let mut reader = (&b"new bytes"[..]).chain(ResetReader);
        let err = store
            .store_package("aa:bb:cc:dd:ee:ff.tgz", &mut reader)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));

        assert_eq!(std::fs::read_to_string(&pkg).unwrap(), "old package");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_store_package_illegal_name() {
        let tmp = tempdir().unwrap();
        let store = HostFileStore::new(tmp.path(), "netboot");

        let mut reader: &[u8] = b"#!/bin/sh\n";
        let err = store
            .store_package("../../etc/cron.d/evil", &mut reader)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Invalid(Error::IllegalFilename(_))
        ));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
