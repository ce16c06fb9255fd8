//! Release archive extraction and orphan cleanup
//!
//! Every entry name is validated before the first byte is written, so an
//! archive carrying a single traversal entry leaves the install untouched.

use crate::env::KioskEnv;
use crate::error::{KioskError, KioskResult};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Destination of `entry_name` under `dest_dir`, or `UnsafeEntry` when the
/// name is absolute, carries a drive prefix or climbs out with `..`.
pub fn validate_entry(dest_dir: &Path, entry_name: &str) -> KioskResult<PathBuf> {
    if entry_name.contains('\0') {
        return Err(KioskError::UnsafeEntry(format!("null byte in {:?}", entry_name)));
    }

    // Archives written on Windows may use either separator.
    let unified = entry_name.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(KioskError::UnsafeEntry(entry_name.to_string()));
    }

    let mut relative = PathBuf::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(KioskError::UnsafeEntry(entry_name.to_string()));
            }
        }
    }
    Ok(dest_dir.join(relative))
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// `a/b/c.txt` plus its parents `a` and `a/b`, without trailing slashes.
fn with_parents(rel: &str) -> Vec<String> {
    let parts: Vec<&str> = rel.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    (1..=parts.len()).map(|i| parts[..i].join("/")).collect()
}

/// Extract `zip_path` into `dest`. Returns the set of relative paths the
/// archive produced (files, folders and every parent folder, `/`-separated).
pub async fn extract_zip<F>(
    env: &KioskEnv,
    zip_path: &Path,
    dest: &Path,
    delete_after: bool,
    mut progress: F,
) -> KioskResult<BTreeSet<String>>
where
    F: FnMut(f64) + Send + 'static,
{
    let zip_path = env.safe_path(zip_path)?;
    let dest = env.safe_path(dest)?;

    let archive_path = zip_path.clone();
    let dest_dir = dest.clone();
    let extracted = tokio::task::spawn_blocking(move || -> KioskResult<BTreeSet<String>> {
        std::fs::create_dir_all(&dest_dir)?;
        let file = std::fs::File::open(&archive_path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        // First pass: validate everything.
        let mut plan = Vec::with_capacity(archive.len());
        let mut extracted = BTreeSet::new();
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            let name = entry.name().replace('\\', "/");
            let rel = name.trim_end_matches('/');
            if rel.is_empty() {
                continue;
            }
            let outpath = validate_entry(&dest_dir, &name)?;
            extracted.extend(with_parents(rel));
            plan.push((i, outpath, entry.is_dir()));
        }

        // Second pass: write.
        let total = plan.len().max(1);
        for (done, (i, outpath, is_dir)) in plan.into_iter().enumerate() {
            if is_dir {
                std::fs::create_dir_all(&outpath)?;
            } else {
                if let Some(parent) = outpath.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut entry = archive.by_index(i)?;
                let mut outfile = std::fs::File::create(&outpath)?;
                std::io::copy(&mut entry, &mut outfile)?;
            }
            let percent = ((done + 1) as f64 / total as f64 * 10000.0).round() / 100.0;
            progress(percent);
        }
        Ok(extracted)
    })
    .await
    .map_err(|e| KioskError::Process(format!("Join error: {}", e)))??;

    if delete_after {
        match std::fs::remove_file(&zip_path) {
            Ok(()) => info!("Deleted zip: {}", zip_path.display()),
            Err(e) => warn!("Could not delete zip: {}", e),
        }
    }
    info!("Extraction complete to: {}", dest.display());
    Ok(extracted)
}

/// Remove every file and folder under `dest` that is not in `valid`, except
/// paths under one of the `ignore` prefixes. Returns how many were removed.
pub fn cleanup_extracted(
    env: &KioskEnv,
    dest: &Path,
    valid: &BTreeSet<String>,
    ignore: &[String],
) -> KioskResult<usize> {
    let dest = env.safe_path(dest)?;
    let ignore: Vec<String> = ignore
        .iter()
        .map(|i| i.replace('\\', "/").trim_matches('/').to_lowercase())
        .filter(|i| !i.is_empty())
        .collect();

    let mut removed = 0;
    cleanup_dir(&dest, &dest, valid, &ignore, &mut removed)?;
    Ok(removed)
}

fn cleanup_dir(
    root: &Path,
    dir: &Path,
    valid: &BTreeSet<String>,
    ignore: &[String],
    removed: &mut usize,
) -> KioskResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let rel = relative_key(root, &path);
        let lower = rel.to_lowercase();

        if ignore
            .iter()
            .any(|ign| lower == *ign || lower.starts_with(&format!("{}/", ign)))
        {
            continue;
        }

        let is_dir = path.is_dir();
        // Children first, so a kept folder can still lose stale files.
        if is_dir {
            cleanup_dir(root, &path, valid, ignore, removed)?;
        }

        if valid.contains(&rel) || valid.contains(&format!("{}/", rel)) {
            continue;
        }
        let result = if is_dir {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => {
                *removed += 1;
                info!("Removed {}: {}", if is_dir { "folder" } else { "file" }, rel);
            }
            Err(e) => warn!("Could not remove {}: {}", rel, e),
        }
    }
    Ok(())
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use accessly_devkit::fixtures::{write_tree, write_zip};
    use accessly_devkit::test_utils::Sandbox;

    fn sandbox_env(sandbox: &Sandbox) -> KioskEnv {
        let (users, program_data, windir) = sandbox.roots();
        KioskEnv::with_roots("GVC", users, program_data, windir)
    }

    #[test]
    fn test_validate_entry() {
        let dest = Path::new("/kiosk");
        assert_eq!(
            validate_entry(dest, "sub/dir/file.txt").unwrap(),
            dest.join("sub").join("dir").join("file.txt")
        );
        assert!(validate_entry(dest, "../../evil.txt").is_err());
        assert!(validate_entry(dest, "sub/../../evil.txt").is_err());
        assert!(validate_entry(dest, "/etc/passwd").is_err());
        assert!(validate_entry(dest, r"C:\Windows\evil.dll").is_err());
        assert!(validate_entry(dest, r"..\evil.txt").is_err());
    }

    #[tokio::test]
    async fn test_traversal_entry_rejected_before_any_write() {
        let sandbox = Sandbox::new();
        let env = sandbox_env(&sandbox);
        let dest = env.base_dir().to_path_buf();
        let zip = sandbox.path().join("evil.zip");
        write_zip(&zip, &[("a.txt", "first"), ("../../evil.txt", "pwned")]);

        let err = extract_zip(&env, &zip, &dest, false, |_| {}).await.unwrap_err();
        assert!(matches!(err, KioskError::UnsafeEntry(_)));
        assert!(!dest.join("a.txt").exists());
        assert!(!sandbox.path().join("evil.txt").exists());
        assert!(zip.exists());
    }

    #[tokio::test]
    async fn test_nested_entry_lands_at_relative_path() {
        let sandbox = Sandbox::new();
        let env = sandbox_env(&sandbox);
        let dest = env.base_dir().to_path_buf();
        let zip = env.update_archive();
        write_zip(&zip, &[("sub/dir/file.txt", "hello"), ("a.txt", "a")]);

        let mut last = 0.0;
        let (tx, rx) = std::sync::mpsc::channel();
        let extracted = extract_zip(&env, &zip, &dest, true, move |p| {
            let _ = tx.send(p);
        })
        .await
        .unwrap();
        for p in rx.try_iter() {
            last = p;
        }

        assert_eq!(
            std::fs::read_to_string(dest.join("sub").join("dir").join("file.txt")).unwrap(),
            "hello"
        );
        for rel in ["sub", "sub/dir", "sub/dir/file.txt", "a.txt"] {
            assert!(extracted.contains(rel), "missing {}", rel);
        }
        assert_eq!(last, 100.0);
        assert!(!zip.exists());
    }

    #[tokio::test]
    async fn test_unsafe_destination_is_fatal() {
        let sandbox = Sandbox::new();
        let env = sandbox_env(&sandbox);
        let zip = env.update_archive();
        write_zip(&zip, &[("a.txt", "a")]);

        let err = extract_zip(&env, &zip, env.windir(), false, |_| {}).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_cleanup_removes_orphans_and_keeps_ignored() {
        let sandbox = Sandbox::new();
        let env = sandbox_env(&sandbox);
        let dest = env.base_dir().to_path_buf();
        write_tree(
            &dest,
            &[
                ("a.txt", "a"),
                ("stale.txt", "old"),
                ("sub/kept.txt", "k"),
                ("old/orphan.txt", "o"),
                ("cache/x.json", "{}"),
            ],
        );

        let valid: BTreeSet<String> = ["a.txt", "sub/", "sub/kept.txt"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let removed =
            cleanup_extracted(&env, &dest, &valid, &["cache/".to_string(), "data/".to_string()])
                .unwrap();

        assert!(dest.join("a.txt").exists());
        assert!(dest.join("sub").join("kept.txt").exists());
        assert!(!dest.join("stale.txt").exists());
        assert!(!dest.join("old").exists());
        assert!(dest.join("cache").join("x.json").exists());
        assert_eq!(removed, 3);
    }

    #[test]
    fn test_with_parents() {
        assert_eq!(with_parents("a/b/c.txt"), vec!["a", "a/b", "a/b/c.txt"]);
        assert_eq!(with_parents("a.txt"), vec!["a.txt"]);
    }
}
