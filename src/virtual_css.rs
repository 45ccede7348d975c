//! Virtual Module Registry
//!
//! A virtual CSS module is identified by a specifier that carries its own
//! contents: `<originFile>.extracted.css?source=<base64url(css)>`. Nothing is
//! stored process-wide; decoding the specifier is the lookup.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::future::BoxFuture;
use futures::FutureExt;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::{contained, ExtractConfig};
use crate::error::{ExtractError, Result};
use crate::host::{
    HostResolve, LoadArgs, LoadResult, ModuleLoader, ModuleResolver, ResolveArgs, ResolveResult,
    SyntaxKind,
};
use crate::post_process::PostProcessBridge;

pub const VIRTUAL_NAMESPACE: &str = "style-extract";

const SOURCE_MARKER: &str = ".extracted.css?source=";

lazy_static! {
    /// Base64url has no `?` or `.`, so the marker can only appear once at the tail.
    pub static ref VIRTUAL_CSS_FILTER: Regex =
        Regex::new(r"\.extracted\.css\?source=[A-Za-z0-9_-]*$").unwrap();
    static ref ANY_PATH: Regex = Regex::new(r".*").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualCssModule {
    /// Originating style file, relative to the project root.
    pub origin_file: String,
    pub css: String,
}

impl VirtualCssModule {
    pub fn new(origin_file: impl Into<String>, css: impl Into<String>) -> Self {
        VirtualCssModule {
            origin_file: origin_file.into(),
            css: css.into(),
        }
    }

    pub fn specifier(&self) -> String {
        encode(&self.origin_file, &self.css)
    }

    /// File name the stylesheet would have on disk, `<originFile>.css`.
    pub fn css_file_name(&self) -> String {
        format!("{}.css", self.origin_file)
    }
}

pub fn encode(origin_file: &str, css: &str) -> String {
    format!(
        "{}{}{}",
        origin_file,
        SOURCE_MARKER,
        URL_SAFE_NO_PAD.encode(css.as_bytes())
    )
}

pub fn decode(specifier: &str) -> Result<VirtualCssModule> {
    let invalid = || ExtractError::InvalidVirtualSpecifier(specifier.to_string());

    let idx = specifier.rfind(SOURCE_MARKER).ok_or_else(invalid)?;
    let origin_file = &specifier[..idx];
    let payload = &specifier[idx + SOURCE_MARKER.len()..];

    let bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
    let css = String::from_utf8(bytes).map_err(|_| invalid())?;

    Ok(VirtualCssModule::new(origin_file, css))
}

pub fn is_virtual_specifier(specifier: &str) -> bool {
    VIRTUAL_CSS_FILTER.is_match(specifier)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST HOOKS
// ═══════════════════════════════════════════════════════════════════════════════

/// Claims virtual specifiers before any filesystem resolution runs.
/// Must be registered ahead of every other resolver.
pub struct VirtualCssResolver;

impl ModuleResolver for VirtualCssResolver {
    fn name(&self) -> &'static str {
        "virtual-css-resolve"
    }

    fn filter(&self) -> &Regex {
        &VIRTUAL_CSS_FILTER
    }

    fn resolve<'a>(
        &'a self,
        args: ResolveArgs,
        _host: &'a dyn HostResolve,
    ) -> BoxFuture<'a, Result<Option<ResolveResult>>> {
        async move {
            Ok(Some(ResolveResult {
                path: args.path,
                namespace: VIRTUAL_NAMESPACE.to_string(),
                side_effects: None,
                external: false,
            }))
        }
        .boxed()
    }
}

pub struct VirtualCssLoader {
    config: Arc<ExtractConfig>,
    post_process: PostProcessBridge,
}

impl VirtualCssLoader {
    pub fn new(config: Arc<ExtractConfig>, post_process: PostProcessBridge) -> Self {
        VirtualCssLoader {
            config,
            post_process,
        }
    }

    fn resolve_dir(&self, module: &VirtualCssModule) -> PathBuf {
        self.config
            .root
            .join(&module.origin_file)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.root.clone())
    }
}

impl ModuleLoader for VirtualCssLoader {
    fn name(&self) -> &'static str {
        "virtual-css-load"
    }

    fn filter(&self) -> &Regex {
        &ANY_PATH
    }

    fn namespace(&self) -> &str {
        VIRTUAL_NAMESPACE
    }

    fn load(&self, args: LoadArgs) -> BoxFuture<'_, Result<Option<LoadResult>>> {
        async move {
            let module = decode(&args.path)?;
            let css_file = module.css_file_name();
            let from = self.config.root.join(&css_file);
            let to = self.config.out_dir.join(contained(&css_file));

            debug!(origin = %module.origin_file, bytes = module.css.len(), "loading virtual css");

            let resolve_dir = self.resolve_dir(&module);
            let contents = self
                .post_process
                .process(&module.origin_file, module.css, &from, &to)
                .await?;

            Ok(Some(LoadResult {
                contents,
                syntax: SyntaxKind::Css,
                resolve_dir: Some(resolve_dir),
            }))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuildMode, PluginOptions, ProjectConfig};
    use crate::post_process::CssProcessor;

    struct NoHost;

    impl HostResolve for NoHost {
        fn resolve(&self, args: ResolveArgs) -> BoxFuture<'_, Result<ResolveResult>> {
            async move {
                Err(ExtractError::Resolve {
                    specifier: args.path,
                    message: "filesystem resolution must not run".to_string(),
                })
            }
            .boxed()
        }
    }

    fn config() -> Arc<ExtractConfig> {
        Arc::new(ExtractConfig::new(
            ProjectConfig {
                root: PathBuf::from("/proj"),
                out_dir: PathBuf::from("/proj/dist"),
                public_path: "/".to_string(),
                mode: BuildMode::Development,
            },
            PluginOptions::default(),
        ))
    }

    #[test]
    fn test_round_trip() {
        let cases = [
            ("src/a.style.ts", ".a {\n  color: red;\n}\n"),
            ("src/empty.style.ts", ""),
            ("weird/na me?.style.ts", ".x::after { content: \"✓ ünïcode\"; }"),
            (
                "nested/a.extracted.css?source=abc/b.style.ts",
                "@media (min-width: 1px) { .b { margin: 0 } }",
            ),
        ];
        for (file, css) in cases {
            let spec = encode(file, css);
            assert!(is_virtual_specifier(&spec), "{spec}");
            let module = decode(&spec).unwrap();
            assert_eq!(module.origin_file, file);
            assert_eq!(module.css, css);
        }
    }

    #[test]
    fn test_distinct_inputs_give_distinct_specifiers() {
        assert_ne!(encode("a.style.ts", ".a{}"), encode("b.style.ts", ".a{}"));
        assert_ne!(encode("a.style.ts", ".a{}"), encode("a.style.ts", ".b{}"));
    }

    #[test]
    fn test_decode_rejects_non_virtual() {
        assert!(matches!(
            decode("src/a.style.ts"),
            Err(ExtractError::InvalidVirtualSpecifier(_))
        ));
        assert!(decode("a.extracted.css?source=***").is_err());
        assert!(!is_virtual_specifier("./theme.css"));
    }

    #[tokio::test]
    async fn test_resolver_claims_without_host() {
        let spec = encode("src/a.style.ts", ".a{}");
        let resolved = VirtualCssResolver
            .resolve(ResolveArgs::new(spec.clone()), &NoHost)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.path, spec);
        assert_eq!(resolved.namespace, VIRTUAL_NAMESPACE);
    }

    #[tokio::test]
    async fn test_loader_returns_css() {
        let loader = VirtualCssLoader::new(config(), PostProcessBridge::default());
        let spec = encode("src/button.style.ts", ".btn{color:red}");
        let loaded = loader
            .load(LoadArgs {
                path: spec,
                namespace: VIRTUAL_NAMESPACE.to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.contents, ".btn{color:red}");
        assert_eq!(loaded.syntax, SyntaxKind::Css);
        assert_eq!(loaded.resolve_dir, Some(PathBuf::from("/proj/src")));
    }

    struct RecordPaths;

    impl CssProcessor for RecordPaths {
        fn process<'a>(
            &'a self,
            css: &'a str,
            from: &'a Path,
            to: &'a Path,
        ) -> BoxFuture<'a, std::result::Result<String, String>> {
            async move { Ok(format!("/* {} -> {} */\n{}", from.display(), to.display(), css)) }
                .boxed()
        }
    }

    #[tokio::test]
    async fn test_loader_runs_post_processor() {
        let loader = VirtualCssLoader::new(
            config(),
            PostProcessBridge::new(Some(Arc::new(RecordPaths))),
        );
        let loaded = loader
            .load(LoadArgs {
                path: encode("src/a.style.ts", ".a{}"),
                namespace: VIRTUAL_NAMESPACE.to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            loaded.contents,
            "/* /proj/src/a.style.ts.css -> /proj/dist/src/a.style.ts.css */\n.a{}"
        );
    }

    #[tokio::test]
    async fn test_loader_keeps_output_inside_out_dir() {
        let loader = VirtualCssLoader::new(
            config(),
            PostProcessBridge::new(Some(Arc::new(RecordPaths))),
        );
        let loaded = loader
            .load(LoadArgs {
                path: encode("../design/tokens.style.ts", ":root{}"),
                namespace: VIRTUAL_NAMESPACE.to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            loaded.contents,
            "/* /proj/../design/tokens.style.ts.css -> /proj/dist/design/tokens.style.ts.css */\n:root{}"
        );
        assert_eq!(loaded.resolve_dir, Some(PathBuf::from("/proj/../design")));
    }
}
