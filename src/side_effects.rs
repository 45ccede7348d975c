//! Side-Effect Annotator
//!
//! Style files often export nothing a consumer reads, yet register global
//! styles when evaluated. The annotator re-resolves every style-file specifier
//! through the host chain and flags the canonical module as side-effecting so
//! tree-shaking keeps it. Installed in the outer build and in every nested build.

use futures::future::BoxFuture;
use futures::FutureExt;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::trace;

use crate::error::Result;
use crate::host::{HostResolve, ModuleResolver, ReentryTag, ResolveArgs, ResolveResult};

lazy_static! {
    /// Specifier filter; tolerates the `?used` query some hosts append.
    pub static ref STYLE_SPECIFIER_FILTER: Regex =
        Regex::new(r"\.style\.(js|mjs|cjs|jsx|ts|mts|cts|tsx)(\?used)?$").unwrap();
    /// Canonical file paths must match without any query.
    pub static ref STYLE_FILE_FILTER: Regex =
        Regex::new(r"\.style\.(js|mjs|cjs|jsx|ts|mts|cts|tsx)$").unwrap();
}

pub fn is_style_file(path: &str) -> bool {
    STYLE_FILE_FILTER.is_match(path)
}

#[derive(Debug, Default)]
pub struct SideEffectAnnotator;

impl SideEffectAnnotator {
    pub fn new() -> Self {
        SideEffectAnnotator
    }
}

impl ModuleResolver for SideEffectAnnotator {
    fn name(&self) -> &'static str {
        "style-side-effects"
    }

    fn filter(&self) -> &Regex {
        &STYLE_SPECIFIER_FILTER
    }

    fn resolve<'a>(
        &'a self,
        args: ResolveArgs,
        host: &'a dyn HostResolve,
    ) -> BoxFuture<'a, Result<Option<ResolveResult>>> {
        async move {
            // Second hop: let the rest of the chain answer.
            if args.is_tagged(ReentryTag::SideEffects) {
                trace!(specifier = %args.path, "re-entrant resolve, declining");
                return Ok(None);
            }

            let specifier = args.path.clone();
            let resolved = host.resolve(args.tagged(ReentryTag::SideEffects)).await?;

            if resolved.external || !is_style_file(&resolved.path) {
                trace!(
                    specifier = %specifier,
                    path = %resolved.path,
                    "not a style file after resolution"
                );
                return Ok(None);
            }

            trace!(
                specifier = %specifier,
                path = %resolved.path,
                "marking style file side-effecting"
            );
            Ok(Some(ResolveResult {
                side_effects: Some(true),
                ..resolved
            }))
        }
        .boxed()
    }
}
