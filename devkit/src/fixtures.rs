/*!
File fixtures: release archives and install trees
*/

use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Write `files` as a deflated zip at `path`, creating parent directories.
/// Entry names are stored verbatim, so hostile names like `../x` work too.
pub fn write_zip(path: &Path, files: &[(&str, &str)]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create zip parent");
    }
    let file = File::create(path).expect("create zip file");
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, content) in files {
        zip.start_file(*name, options).expect("start zip entry");
        zip.write_all(content.as_bytes()).expect("write zip entry");
    }
    zip.finish().expect("finish zip");
}

/// Create each `relative path -> content` file under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create tree dir");
        }
        std::fs::write(&path, content).expect("write tree file");
    }
}
