// src/artifact.rs

//! Build outputs
//!
//! Disk images are xz-compressed (or copied as-is) into the output directory,
//! rootfs builds are packed into a zstd-compressed tarball, and every output
//! gets a `sha256sum`-style sidecar.

use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::info;
use xz2::write::XzEncoder;

/// Smallest image the size estimate will produce (1 GiB)
pub const MIN_IMAGE_KIB: u64 = 1024 * 1024;

const XZ_LEVEL: u32 = 5;
const XZ_FAST_LEVEL: u32 = 1;
const ZSTD_LEVEL: i32 = 3;

/// One file written to the output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub sha256: String,
    pub checksum_file: PathBuf,
}

/// Image size for a root tree of `tree_bytes`
///
/// Content plus a quarter for headroom, plus everything in front of the root
/// partition, never less than [`MIN_IMAGE_KIB`].
pub fn estimate_size_kib(tree_bytes: u64, root_start_bytes: u64) -> u64 {
    let content = tree_bytes.div_ceil(1024);
    let estimate = content + content / 4 + root_start_bytes.div_ceil(1024);
    estimate.max(MIN_IMAGE_KIB)
}

/// xz compression level for a build
pub fn xz_level(fast_forward: bool) -> u32 {
    if fast_forward { XZ_FAST_LEVEL } else { XZ_LEVEL }
}

fn make_readable(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    Ok(())
}

/// Hex SHA-256 of a file, streamed
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Write `<path>.sha256` next to `path`
pub fn write_checksum(path: &Path) -> Result<Artifact> {
    let sha256 = sha256_file(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut checksum_file = path.as_os_str().to_owned();
    checksum_file.push(".sha256");
    let checksum_file = PathBuf::from(checksum_file);

    fs::write(&checksum_file, format!("{}  {}\n", sha256, file_name))?;
    make_readable(&checksum_file)?;

    Ok(Artifact {
        path: path.to_path_buf(),
        sha256,
        checksum_file,
    })
}

/// Compress `src` with xz into `dst`
pub fn compress_xz(src: &Path, dst: &Path, level: u32) -> Result<()> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut encoder = XzEncoder::new(BufWriter::new(File::create(dst)?), level);
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()?;
    Ok(())
}

/// Move a finished disk image into `out_dir`
///
/// With `compress` the result is `<name>.img.xz`, otherwise a plain copy.
pub fn publish_image(
    image: &Path,
    out_dir: &Path,
    compress: bool,
    fast_forward: bool,
) -> Result<Artifact> {
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.img".to_string());

    let dst = if compress {
        let dst = out_dir.join(format!("{}.xz", file_name));
        let level = xz_level(fast_forward);
        info!("Compressing {} (xz level {})", file_name, level);
        compress_xz(image, &dst, level)?;
        dst
    } else {
        let dst = out_dir.join(&file_name);
        info!("Copying {} to {}", file_name, out_dir.display());
        fs::copy(image, &dst)?;
        dst
    };

    make_readable(&dst)?;
    write_checksum(&dst)
}

/// Pack a root tree into `<out_dir>/<name>.tar.zst`
///
/// Ownership and modes are stored, symlinks are archived as links.
pub fn pack_rootfs(root: &Path, out_dir: &Path, name: &str) -> Result<Artifact> {
    let dst = out_dir.join(format!("{}.tar.zst", name));
    info!("Packing {} into {}", root.display(), dst.display());

    let encoder = zstd::Encoder::new(BufWriter::new(File::create(&dst)?), ZSTD_LEVEL)?;
    let mut archive = tar::Builder::new(encoder);
    archive.follow_symlinks(false);
    archive.append_dir_all(".", root)?;

    let encoder = archive.into_inner()?;
    encoder.finish()?.flush()?;

    make_readable(&dst)?;
    write_checksum(&dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_estimate_has_floor() {
        assert_eq!(estimate_size_kib(0, 0), MIN_IMAGE_KIB);
        assert_eq!(estimate_size_kib(10 * 1024 * 1024, 1024 * 1024), MIN_IMAGE_KIB);
    }

    #[test]
    fn test_estimate_headroom() {
        // 4 GiB of content, root at 257 MiB
        let tree = 4u64 << 30;
        let start = 257u64 << 20;
        assert_eq!(
            estimate_size_kib(tree, start),
            (4 << 20) + (1 << 20) + 257 * 1024
        );
    }

    #[test]
    fn test_checksum_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("hello.img");
        fs::write(&file, b"Hello, World!").unwrap();

        let artifact = write_checksum(&file).unwrap();
        assert_eq!(
            artifact.sha256,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
        assert_eq!(artifact.checksum_file, tmp.path().join("hello.img.sha256"));
        assert_eq!(
            fs::read_to_string(&artifact.checksum_file).unwrap(),
            format!("{}  hello.img\n", artifact.sha256)
        );
    }

    #[test]
    fn test_publish_compressed() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let image = tmp.path().join("board.img");
        fs::write(&image, vec![0u8; 64 * 1024]).unwrap();

        let artifact = publish_image(&image, &out, true, true).unwrap();
        assert_eq!(artifact.path, out.join("board.img.xz"));

        let mut decoded = Vec::new();
        xz2::read::XzDecoder::new(File::open(&artifact.path).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded.len(), 64 * 1024);

        let mode = fs::metadata(&artifact.path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_publish_uncompressed() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let image = tmp.path().join("board-boot.img");
        fs::write(&image, b"boot").unwrap();

        let artifact = publish_image(&image, &out, false, false).unwrap();
        assert_eq!(artifact.path, out.join("board-boot.img"));
        assert!(out.join("board-boot.img.sha256").is_file());
    }

    #[test]
    fn test_pack_rootfs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("etc/hostname"), "board\n").unwrap();
        std::os::unix::fs::symlink("/proc/self/mounts", root.join("etc/mtab")).unwrap();
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();

        let artifact = pack_rootfs(&root, &out, "board").unwrap();
        assert_eq!(artifact.path, out.join("board.tar.zst"));

        let decoder = zstd::Decoder::new(File::open(&artifact.path).unwrap()).unwrap();
        let mut archive = tar::Archive::new(decoder);
        let mut names = Vec::new();
        let mut mtab_is_link = false;
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path().unwrap().into_owned();
            if path.ends_with("etc/mtab") {
                mtab_is_link = entry.header().entry_type().is_symlink();
            }
            names.push(path);
        }
        assert!(names.iter().any(|p| p.ends_with("etc/hostname")));
        assert!(mtab_is_link);
    }
}
