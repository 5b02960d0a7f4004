//! Kernel Host Bindings
//!
//! Host functions pre-populated into the kernel namespace so model-written
//! code can call back into the agent's collaborators. The search backend is
//! injected here by handle; no global state is involved.

use std::sync::Arc;

use rhai::{Dynamic, Engine, EvalAltResult};

use crate::search::SearchIndex;

/// Default number of results when the script omits `top_k`.
pub const DEFAULT_TOP_K: usize = 5;

/// Register `code_search(query)` and `code_search(query, top_k)` on the
/// engine, backed by the injected index. Results arrive in the script as an
/// array of `#{ content, metadata: #{ file_path, content_hash, score } }`
/// maps.
pub fn register_search(engine: &mut Engine, index: Arc<dyn SearchIndex>) {
    let with_k = Arc::clone(&index);
    engine.register_fn(
        "code_search",
        move |query: &str, top_k: i64| -> Result<Dynamic, Box<EvalAltResult>> {
            search_dynamic(&*with_k, query, top_k.max(0) as usize)
        },
    );
    engine.register_fn(
        "code_search",
        move |query: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            search_dynamic(&*index, query, DEFAULT_TOP_K)
        },
    );
}

fn search_dynamic(
    index: &dyn SearchIndex,
    query: &str,
    top_k: usize,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let hits = index
        .search(query, top_k)
        .map_err(|err| -> Box<EvalAltResult> { format!("code_search failed: {}", err).into() })?;
    rhai::serde::to_dynamic(&hits)
}
