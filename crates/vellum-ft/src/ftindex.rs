//! The fast full-text index behind the [`Index`] trait.
//!
//! Mutations only stage document texts; [`FtFastIndex::commit_fulltext`]
//! runs the build pipeline and publishes a fresh [`DataHolder`]. The
//! namespace commits dirty FT indexes before executing a select, so
//! `select_key` always reads a published holder.

use std::any::Any;
use std::sync::Arc;

use tracing::debug;
use vellum_error::{Result, VellumError};
use vellum_index::{
    ComparatorField, Index, IndexBase, IndexDef, IndexMemStat, SelectKeyResult,
    SelectKeyResults, SelectOpts, SingleKeyResult, SortOrdersCtx, SortType,
};
use vellum_types::{CondType, Cx, RowId, Value};

use crate::config::FtConfig;
use crate::dsl;
use crate::holder::DataHolder;
use crate::processor::{self, DocTexts};
use crate::selecter;

/// Document count above which the commit pipeline goes multi-threaded.
const MULTITHREAD_BUILD_THRESHOLD: usize = 512;

/// Fast full-text index.
#[derive(Debug)]
pub struct FtFastIndex {
    base: IndexBase,
    cfg: FtConfig,
    docs: Vec<Option<DocTexts>>,
    holder: DataHolder,
    dirty: bool,
}

impl FtFastIndex {
    pub fn new(def: IndexDef, cfg: FtConfig) -> Result<Self> {
        def.validate()?;
        if !def.is_fulltext() {
            return Err(VellumError::Params(format!(
                "index '{}' is not a full-text definition",
                def.name
            )));
        }
        let fields = def.json_paths.len().max(1);
        Ok(Self {
            base: IndexBase::new(def),
            holder: DataHolder::new(cfg.clone(), fields),
            cfg,
            docs: Vec::new(),
            dirty: false,
        })
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn config(&self) -> &FtConfig {
        &self.cfg
    }

    /// Rebuild and publish the holder from the staged texts.
    pub fn commit_fulltext(&mut self) {
        if !self.dirty {
            return;
        }
        let fields = self.base.def.json_paths.len().max(1);
        let multithread = self.docs.len() >= MULTITHREAD_BUILD_THRESHOLD;
        self.holder = processor::process(&self.cfg, fields, &self.docs, multithread);
        self.dirty = false;
        debug!(index = %self.base.def.name, docs = self.docs.len(), "full-text commit");
    }

    fn fields_count(&self) -> usize {
        self.base.def.json_paths.len().max(1)
    }
}

impl Index for FtFastIndex {
    fn def(&self) -> &IndexDef {
        &self.base.def
    }

    fn is_ordered(&self) -> bool {
        false
    }

    fn is_fulltext(&self) -> bool {
        true
    }

    fn sort_id(&self) -> SortType {
        self.base.sort_id
    }

    fn set_sort_id(&mut self, id: SortType) {
        self.base.sort_id = id;
    }

    fn bind_comparator_field(&mut self, field: ComparatorField) {
        self.base.cmp_field = field;
    }

    fn upsert(&mut self, keys: &[Value], id: RowId) -> Result<Vec<Value>> {
        let idx = id as usize;
        if self.docs.len() <= idx {
            self.docs.resize(idx + 1, None);
        }
        let mut texts: DocTexts = Vec::with_capacity(self.fields_count());
        for f in 0..self.fields_count() {
            texts.push(match keys.get(f) {
                Some(Value::Str(s)) => s.to_string(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.render(),
            });
        }
        self.docs[idx] = Some(texts);
        self.dirty = true;
        Ok(keys.to_vec())
    }

    fn delete(&mut self, _keys: &[Value], id: RowId, _retired: &mut Vec<Arc<str>>) -> Result<()> {
        if let Some(slot) = self.docs.get_mut(id as usize) {
            *slot = None;
            self.dirty = true;
        }
        Ok(())
    }

    fn select_key(
        &self,
        keys: &[Value],
        cond: CondType,
        _sort_id: SortType,
        _opts: &SelectOpts,
        cx: &Cx,
    ) -> Result<SelectKeyResults> {
        if cond != CondType::Eq && cond != CondType::Set {
            return Err(VellumError::QueryExec(format!(
                "full-text index '{}' only supports equality match",
                self.base.def.name
            )));
        }
        if self.dirty {
            return Err(VellumError::StateInvalidated(format!(
                "full-text index '{}' has uncommitted changes",
                self.base.def.name
            )));
        }
        let Some(Value::Str(query)) = keys.first() else {
            return Err(VellumError::Params(
                "full-text match expects a string query".to_owned(),
            ));
        };

        let parsed = dsl::parse(query, self.fields_count())?;
        let data = selecter::select(&self.holder, &parsed, cx)?;

        // Scale into [0, 255] and drop sub-relevant tails.
        let scale = if data.max_rank > 255.0 {
            255.0 / data.max_rank
        } else {
            1.0
        };
        let threshold = self.cfg.min_relevancy * 100.0 * scale;
        let mut ids = Vec::with_capacity(data.merged.len());
        let mut ranks = Vec::with_capacity(data.merged.len());
        for info in data.merged.iter().take(self.cfg.merge_limit) {
            let rank = info.proc * scale;
            if rank < threshold {
                continue;
            }
            ids.push(info.id);
            ranks.push(rank.min(255.0).round() as i32);
        }
        let result = SelectKeyResult {
            ids: vec![SingleKeyResult::SortedIds(Arc::new(ids))],
            comparators: Vec::new(),
            ranks,
        };
        Ok(vec![result])
    }

    fn commit(&mut self) {
        self.commit_fulltext();
    }

    fn make_sort_orders(&mut self, _ctx: &mut SortOrdersCtx) {}

    fn update_sorted_ids(&mut self, _ctx: &SortOrdersCtx) {}

    fn sort_orders(&self) -> &[RowId] {
        &[]
    }

    fn clear_cache(&self) {}

    fn keys_count(&self) -> usize {
        self.holder.words.len()
    }

    fn mem_stat(&self) -> IndexMemStat {
        IndexMemStat {
            name: self.base.def.name.clone(),
            unique_keys_count: self.holder.words.len(),
            idsets_size: self
                .holder
                .words
                .iter()
                .map(|w| w.vids.heap_size())
                .sum::<usize>()
                + self.holder.suffixes.heap_size(),
            sort_orders_size: 0,
            cache_items: 0,
        }
    }

    fn clone_index(&self) -> Box<dyn Index> {
        Box::new(Self {
            base: self.base.clone(),
            cfg: self.cfg.clone(),
            docs: self.docs.clone(),
            holder: self.holder.clone(),
            dirty: self.dirty,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
