//! A service serving a local directory over HTTP.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use http::Method;
use mime::Mime;
use serde_json::Value;
use switchyard_content::PlainContainer;
use switchyard_core::content::Negotiated;
use switchyard_core::settings::defaults;
use switchyard_core::stage::FnPostRequest;
use switchyard_core::{handler_fn, Args, Context, Endpoint, HandlerShape, RpcError, RpcResult, SetupError};

use crate::http::Route;
use crate::service::Service;

/// Weight of the post-request hook fixing the response media type.
const FILE_TYPE_WEIGHT: i32 = 0;

/// Serves the files below a directory under a URL prefix.
///
/// `GET` and `HEAD` on `<prefix>/<path>` answer with the file at
/// `<root>/<path>`. The media type comes from the file extension; unknown
/// extensions are served as `application/octet-stream`. Paths leaving the
/// root (also through symlinks), hidden files, and anything that is not a
/// regular file are not found.
///
/// Every media type in the table needs a builder in the server's
/// [`BuilderRegistry`](switchyard_content::BuilderRegistry).
///
/// ```no_run
/// use switchyard_server::files::StaticFiles;
///
/// # fn setup() -> Result<(), switchyard_core::SetupError> {
/// let assets = StaticFiles::new("./public", "/assets")
///     .file_type("mjs", mime::TEXT_JAVASCRIPT)
///     .into_service("assets")?;
/// # let _ = assets;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    prefix: String,
    types: HashMap<String, Mime>,
}

impl StaticFiles {
    /// Serves `root` under `prefix` with the default extension table.
    pub fn new(root: impl Into<PathBuf>, prefix: &str) -> Self {
        let types = [
            ("html", mime::TEXT_HTML),
            ("htm", mime::TEXT_HTML),
            ("css", mime::TEXT_CSS),
            ("js", mime::TEXT_JAVASCRIPT),
            ("txt", mime::TEXT_PLAIN),
            ("png", mime::IMAGE_PNG),
        ];
        Self {
            root: root.into(),
            prefix: prefix.trim_end_matches('/').to_string(),
            types: types.into_iter().map(|(ext, mime)| (ext.to_string(), mime)).collect(),
        }
    }

    /// Maps a file extension (without the dot) to a media type.
    ///
    /// Text types are served as text; any other type is served as bytes.
    pub fn file_type(mut self, extension: &str, mime_type: Mime) -> Self {
        self.types.insert(extension.to_ascii_lowercase(), mime_type);
        self
    }

    /// Builds the service. Fails if the root is not a directory.
    pub fn into_service(self, name: impl Into<String>) -> Result<Service, SetupError> {
        if !self.root.is_dir() {
            return Err(SetupError::invalid_setting(
                "static files root",
                format!("{} is not a directory", self.root.display()),
            ));
        }
        let route = format!("{}/{{*path}}", self.prefix);
        let files = Arc::new(self);

        let serving = Arc::clone(&files);
        let endpoint = Endpoint::builder(
            "file",
            HandlerShape::function().param("path"),
            handler_fn(move |args: Args| {
                let files = Arc::clone(&serving);
                let requested = args.get("path").and_then(Value::as_str).map(str::to_string);
                async move {
                    let requested = requested.ok_or_else(|| RpcError::missing_parameter("path"))?;
                    files.load(&requested).await
                }
            }),
        )
        .document("A file below the served directory.")
        .build()?;

        let typing = Arc::clone(&files);
        endpoint.stage().add_post_request(
            FnPostRequest::new("file_type", move |ctx: &mut Context| typing.fix_media_type(ctx)),
            FILE_TYPE_WEIGHT,
        )?;
        endpoint.attach_child(Route::new(route).methods([Method::GET, Method::HEAD]).name("file"));

        let mut service = Service::new(name);
        service.add_endpoint(endpoint)?;
        Ok(service)
    }

    fn media_type(&self, path: &str) -> Mime {
        Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.types.get(&ext.to_ascii_lowercase()))
            .cloned()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM)
    }

    /// Maps a requested path onto the root, refusing anything but plain,
    /// visible path segments.
    fn locate(&self, requested: &str) -> Option<PathBuf> {
        let mut located = self.root.clone();
        for component in Path::new(requested).components() {
            match component {
                Component::Normal(segment) if segment.to_string_lossy().starts_with('.') => return None,
                Component::Normal(segment) => located.push(segment),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        (located != self.root).then_some(located)
    }

    async fn load(&self, requested: &str) -> RpcResult<Value> {
        let not_found = || RpcError::not_found(format!("no file {requested}"));
        let path = self.locate(requested).ok_or_else(not_found)?;

        let path = match tokio::fs::canonicalize(&path).await {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(RpcError::internal(format!("cannot resolve {}: {e}", path.display()))),
        };
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| RpcError::internal(format!("cannot resolve {}: {e}", self.root.display())))?;
        if !path.starts_with(&root) {
            tracing::debug!(requested, "refusing path outside the served directory");
            return Err(not_found());
        }

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| RpcError::internal(format!("cannot stat {}: {e}", path.display())))?;
        if !metadata.is_file() {
            return Err(not_found());
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| RpcError::internal(format!("cannot read {}: {e}", path.display())))?;
        tracing::debug!(file = %path.display(), bytes = bytes.len(), "serving static file");

        if self.media_type(requested).type_() == mime::TEXT {
            Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        } else {
            Ok(Value::Array(bytes.into_iter().map(Value::from).collect()))
        }
    }

    fn fix_media_type(&self, ctx: &mut Context) -> RpcResult<()> {
        if ctx.response.negotiated().is_some() {
            return Ok(());
        }
        let Some(requested) = ctx.params.get("path").and_then(Value::as_str) else {
            return Ok(());
        };
        let mime_type = self.media_type(requested).essence_str().to_string();
        ctx.response.set_negotiated(Negotiated {
            mime_type,
            encoding: defaults::RESPONSE_ENCODING.to_string(),
            container: Arc::new(PlainContainer),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> StaticFiles {
        StaticFiles::new("/srv/www", "/static/")
    }

    #[test]
    fn test_locate_stays_below_root() {
        let files = files();
        assert_eq!(files.locate("css/site.css"), Some(PathBuf::from("/srv/www/css/site.css")));
        assert_eq!(files.locate("./a.txt"), Some(PathBuf::from("/srv/www/a.txt")));
        assert_eq!(files.locate("../etc/passwd"), None);
        assert_eq!(files.locate("css/../../etc/passwd"), None);
        assert_eq!(files.locate("/etc/passwd"), None);
        assert_eq!(files.locate(".env"), None);
        assert_eq!(files.locate("css/.git/config"), None);
        assert_eq!(files.locate(""), None);
    }

    #[test]
    fn test_media_type_by_extension() {
        let files = files().file_type("svg", "image/svg+xml".parse().unwrap());
        assert_eq!(files.media_type("index.HTML"), mime::TEXT_HTML);
        assert_eq!(files.media_type("app.js"), mime::TEXT_JAVASCRIPT);
        assert_eq!(files.media_type("logo.svg").essence_str(), "image/svg+xml");
        assert_eq!(files.media_type("archive.tar.gz"), mime::APPLICATION_OCTET_STREAM);
        assert_eq!(files.media_type("README"), mime::APPLICATION_OCTET_STREAM);
    }

    #[test]
    fn test_prefix_trailing_slash_dropped() {
        assert_eq!(files().prefix, "/static");
    }

    #[test]
    fn test_root_must_be_a_directory() {
        let err = StaticFiles::new("/definitely/not/here", "/x").into_service("x").unwrap_err();
        assert!(matches!(err, SetupError::InvalidSetting { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_load_reads_text_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi there").unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0u8, 255]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let files = StaticFiles::new(dir.path(), "/static");

        assert_eq!(files.load("hello.txt").await.unwrap(), Value::from("hi there"));
        assert_eq!(files.load("blob.bin").await.unwrap(), serde_json::json!([0, 255]));
        #[cfg(unix)]
        std::os::unix::fs::symlink(std::env::temp_dir(), dir.path().join("escape")).unwrap();
        for missing in ["nope.txt", "sub", "../hello.txt", "escape"] {
            let err = files.load(missing).await.unwrap_err();
            assert_eq!(err.kind(), switchyard_core::ErrorKind::NotFound, "{missing}");
        }
    }
}
