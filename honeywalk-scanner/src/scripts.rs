// Script capture with per-origin dedup and a recursion guard

use crate::engine::{ScriptCompilation, ScriptListener, ScriptVerdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptElement {
    pub id: u32,
    pub source: String,
    pub is_eval: bool,
}

/// origin URL -> script name -> script
pub type ScriptsByOrigin = BTreeMap<String, BTreeMap<String, ScriptElement>>;

#[derive(Debug)]
pub struct ScriptOriginRegistry {
    scripts: ScriptsByOrigin,
    next_id: u32,
    recursion_limit: i32,
    enabled: bool,
}

impl ScriptOriginRegistry {
    /// A negative `recursion_limit` disables the recursion guard.
    pub fn new(recursion_limit: i32) -> Self {
        Self {
            scripts: ScriptsByOrigin::new(),
            next_id: 1,
            recursion_limit,
            enabled: true,
        }
    }

    pub fn on_script_compiled(&mut self, script: &ScriptCompilation) -> ScriptVerdict {
        if !self.enabled {
            debug!("Script processing disabled, dropping {}", script.name);
            return ScriptVerdict::Abort(format!(
                "JavaScript processing is stopped. Source won't be processed: {}",
                script.name
            ));
        }

        let per_origin = self.scripts.entry(script.origin.clone()).or_default();
        if per_origin.contains_key(&script.name) {
            debug!("Sources from {} already contain {}", script.origin, script.name);
        } else {
            debug!("Adding new script {} from {}", script.name, script.origin);
            per_origin.insert(
                script.name.clone(),
                ScriptElement {
                    id: self.next_id,
                    source: script.source.clone(),
                    is_eval: script.generated,
                },
            );
            self.next_id += 1;
        }

        if let Ok(limit) = usize::try_from(self.recursion_limit)
            && (script.stack_depth >= limit || script.parent_depth >= limit.max(1))
        {
            warn!(
                "Recursive JavaScript call attempt ({}) in {}",
                script.stack_depth, script.origin
            );
            return ScriptVerdict::Abort(format!(
                "Recursive JavaScript call attempt({}).",
                script.stack_depth
            ));
        }

        ScriptVerdict::Proceed
    }

    pub fn disable_processing(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn sources_by_origin(&self) -> &ScriptsByOrigin {
        &self.scripts
    }

    pub fn take_sources(&mut self) -> ScriptsByOrigin {
        std::mem::take(&mut self.scripts)
    }

    /// Number of captured scripts over all origins.
    pub fn len(&self) -> usize {
        self.scripts.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct SharedScriptRegistry {
    inner: Arc<Mutex<ScriptOriginRegistry>>,
}

impl SharedScriptRegistry {
    pub fn new(recursion_limit: i32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptOriginRegistry::new(recursion_limit))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScriptOriginRegistry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn disable_processing(&self) {
        self.lock().disable_processing();
    }

    pub fn take_sources(&self) -> ScriptsByOrigin {
        self.lock().take_sources()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl ScriptListener for SharedScriptRegistry {
    fn script_compiled(&self, script: &ScriptCompilation) -> ScriptVerdict {
        self.lock().on_script_compiled(script)
    }
}
