//! Fixtures shared by the unit tests: a recording sink, throwaway scripts, a
//! fake compiler distribution and a loopback HTTP server.

use crate::sink::Sink;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tiny_http::{Response, Server};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

#[derive(Default)]
pub(crate) struct RecordingSink {
    lines: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingSink {
    fn level(&self, level: &str) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub(crate) fn infos(&self) -> Vec<String> {
        self.level("info")
    }

    pub(crate) fn warnings(&self) -> Vec<String> {
        self.level("warn")
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.level("error")
    }
}

impl Sink for RecordingSink {
    fn info(&self, line: &str) {
        self.lines.lock().unwrap().push(("info", line.to_string()));
    }

    fn debug(&self, line: &str) {
        self.lines.lock().unwrap().push(("debug", line.to_string()));
    }

    fn warn(&self, line: &str) {
        self.lines.lock().unwrap().push(("warn", line.to_string()));
    }

    fn error(&self, line: &str) {
        self.lines.lock().unwrap().push(("error", line.to_string()));
    }
}

/// Write an executable `/bin/sh` script.
#[cfg(unix)]
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Shell stand-in for the compiler's command-line contract.
///
/// Answers `--version`, writes one Java class per source under
/// `<outdir>/src/<package path>/`, and exits 2 with a compiler-style
/// diagnostic when a source declares an identifier starting with an
/// uppercase letter.
pub(crate) const FAKE_COMPILER: &str = r#"#!/bin/sh
outdir=""
package=""
from_file_class=""
sources=""
while [ $# -gt 0 ]; do
  case "$1" in
    --version) echo "kaitai-struct-compiler 0.10"; exit 0 ;;
    --outdir) outdir="$2"; shift 2 ;;
    --java-package) package="$2"; shift 2 ;;
    --java-from-file-class) from_file_class="$2"; shift 2 ;;
    --target|--opaque-types) shift 2 ;;
    --*) shift ;;
    *) sources="$sources $1"; shift ;;
  esac
done
status=0
for src in $sources; do
  bad=$(sed -n 's/^ *- *id: *\([A-Z][A-Za-z0-9_]*\).*/\1/p' "$src" | head -n 1)
  if [ -n "$bad" ]; then
    echo "$src: /seq/0/id: invalid attribute ID: '$bad', expected /^[a-z][a-z0-9_]*\$/" >&2
    status=2
  fi
done
if [ $status -ne 0 ]; then
  exit $status
fi
pkgdir="$outdir/src/$(echo "$package" | tr . /)"
mkdir -p "$pkgdir"
for src in $sources; do
  name=$(basename "$src" .ksy)
  class=$(echo "$name" | awk -F_ '{ for (i = 1; i <= NF; i++) printf "%s%s", toupper(substr($i, 1, 1)), substr($i, 2) }')
  {
    echo "package $package;"
    if [ -n "$from_file_class" ]; then
      echo "// stream: $from_file_class"
    fi
    echo "public class $class {}"
  } > "$pkgdir/$class.java"
  echo "generated $class"
done
"#;

pub(crate) const VALID_KSY: &str = "meta:\n  id: ico\n  endian: le\nseq:\n  - id: magic\n    contents: [0, 0, 1, 0]\n";

pub(crate) const INVALID_KSY: &str = "meta:\n  id: demo\nseq:\n  - id: Magic\n    size: 4\n";

/// Build a compiler distribution archive shaped like the official one:
/// `<dist>/bin/kaitai-struct-compiler` plus its `.bat` twin.
///
/// The unix script is stored without execute bits.
pub(crate) fn write_fake_distribution(zip_path: &Path, dist_name: &str) {
    let file = File::create(zip_path).unwrap();
    let mut zip = ZipWriter::new(file);
    let script_opts = SimpleFileOptions::default().unix_permissions(0o644);

    zip.add_directory(format!("{dist_name}/"), SimpleFileOptions::default())
        .unwrap();
    zip.add_directory(format!("{dist_name}/bin/"), SimpleFileOptions::default())
        .unwrap();
    zip.start_file(format!("{dist_name}/bin/kaitai-struct-compiler"), script_opts)
        .unwrap();
    zip.write_all(FAKE_COMPILER.as_bytes()).unwrap();
    zip.start_file(
        format!("{dist_name}/bin/kaitai-struct-compiler.bat"),
        script_opts,
    )
    .unwrap();
    zip.write_all(b"@echo off\r\n").unwrap();
    zip.start_file(format!("{dist_name}/lib/compiler.jar"), SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"not really a jar").unwrap();
    zip.finish().unwrap();
}

/// Write a ZIP with the given `(entry name, content)` pairs, names verbatim.
pub(crate) fn write_zip(zip_path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(zip_path).unwrap();
    let mut zip = ZipWriter::new(file);
    for (name, content) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap();
}

/// Loopback HTTP server answering GETs for `path` with `body` and 404
/// otherwise. Every request is counted.
pub(crate) struct TestServer {
    pub(crate) base: String,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    pub(crate) fn serve(path: &str, body: Vec<u8>) -> Self {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let path = path.to_string();

        thread::spawn(move || {
            for request in server.incoming_requests() {
                counter.fetch_add(1, Ordering::SeqCst);
                let response = if request.url() == path {
                    Response::from_data(body.clone()).with_status_code(200)
                } else {
                    Response::from_data(b"missing".to_vec()).with_status_code(404)
                };
                let _ = request.respond(response);
            }
        });

        Self {
            base: format!("http://127.0.0.1:{port}"),
            hits,
        }
    }

    pub(crate) fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}
