//! The namespace engine: item lifecycle, PK lookup, index-set
//! maintenance, WAL emission, storage integration, TTL and background
//! optimization.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, info};
use vellum_error::{Result, VellumError};
use vellum_ft::FtFastIndex;
use vellum_index::{
    create_index, ComparatorField, Index, IndexDef, IndexMemStat, SortOrdersCtx,
};
use vellum_query::{Query, QueryType};
use vellum_storage::{
    read_sys_record, write_sys_record, AsyncStorage, Storage, SysRecordKind, SYS_STORAGE_MAGIC,
    SYS_STORAGE_VERSION,
};
use vellum_types::{
    CondType, Cx, Lsn, Payload, PayloadType, PayloadValue, RowId, TagsMatcher, TagsPath, Value,
};

use crate::config::NamespaceConfig;
use crate::item::{payload_to_json, Item};
use crate::results::QueryResults;
use crate::selector;
use crate::stringsholder::StringsHolder;
use crate::wal::{Wal, WalRecord, MODE_DELETE, MODE_INSERT, MODE_UPDATE, MODE_UPSERT};

/// Item record key prefix in storage.
const ITEM_PREFIX: &[u8] = b"it:";
/// Meta record key prefix in storage.
const META_PREFIX: &[u8] = b"meta:";

/// Item modification verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemMode {
    Insert,
    Update,
    Upsert,
    Delete,
}

impl ItemMode {
    const fn wal_mode(self) -> u8 {
        match self {
            Self::Insert => MODE_INSERT,
            Self::Update => MODE_UPDATE,
            Self::Upsert => MODE_UPSERT,
            Self::Delete => MODE_DELETE,
        }
    }
}

/// Flags of one engine call.
#[derive(Debug, Clone, Default)]
pub struct NsContext {
    pub cx: Cx,
    /// Reconstructing from storage: skip WAL and storage writes.
    pub loading: bool,
    /// Inside a transaction replay: records already accounted for.
    pub in_transaction: bool,
    /// Coming from the replication stream (allowed on slave namespaces).
    pub from_replication: bool,
}

/// Where an index reads its keys from.
#[derive(Debug, Clone)]
pub(crate) enum IndexSource {
    /// A dense payload field.
    Field(usize),
    /// Extracted through the tags matcher (sparse indexes).
    Sparse { path: String, tags: TagsPath },
    /// Tuple of other payload fields (composite indexes).
    Composite(Vec<usize>),
    /// Full-text: one string source per declared json path.
    Fulltext(Vec<FtSource>),
}

#[derive(Debug, Clone)]
pub(crate) enum FtSource {
    Field(usize),
    Path { path: String, tags: TagsPath },
}

#[derive(Debug, Clone, Copy, Default)]
struct SysVersions {
    tags: u64,
    indexes: u64,
    schema: u64,
    repl: u64,
}

/// One namespace: document store + indexes + WAL + storage binding.
pub struct Namespace {
    pub name: String,
    pub(crate) payload_type: PayloadType,
    pub(crate) tags: TagsMatcher,
    pub(crate) indexes: Vec<Box<dyn Index>>,
    pub(crate) index_sources: Vec<IndexSource>,
    pub(crate) items: Vec<Option<PayloadValue>>,
    free_list: Vec<RowId>,
    pub(crate) pk_idx: Option<usize>,
    pub(crate) data_hash: u64,
    items_data_size: usize,
    wal: Wal,
    storage: Option<Arc<AsyncStorage>>,
    sys_versions: SysVersions,
    meta: HashMap<String, String>,
    schema: Option<String>,
    pub(crate) strings: StringsHolder,
    pub config: NamespaceConfig,
    pub slave_mode: bool,
    pub(crate) sorted_count: usize,
    last_update: Instant,
    optimized: bool,
    /// Cached totals for COUNT_CACHED, cleared on every mutation.
    pub(crate) count_cache: Mutex<HashMap<String, usize>>,
    /// Set when a copy-commit replaced this generation.
    pub invalidated: bool,
}

impl Namespace {
    #[must_use]
    pub fn new(name: impl Into<String>, config: NamespaceConfig) -> Self {
        let name = name.into();
        Self {
            payload_type: PayloadType::new(name.clone()),
            tags: TagsMatcher::new(),
            indexes: Vec::new(),
            index_sources: Vec::new(),
            items: Vec::new(),
            free_list: Vec::new(),
            pk_idx: None,
            data_hash: 0,
            items_data_size: 0,
            wal: Wal::new(config.wal_size, config.server_id),
            storage: None,
            sys_versions: SysVersions::default(),
            meta: HashMap::new(),
            schema: None,
            strings: StringsHolder::new(),
            config,
            slave_mode: false,
            sorted_count: 0,
            last_update: Instant::now(),
            optimized: false,
            count_cache: Mutex::new(HashMap::new()),
            invalidated: false,
            name,
        }
    }

    // ------------------------------------------------------------------
    // Storage binding
    // ------------------------------------------------------------------

    /// Attach a storage backend and reconstruct state from it.
    pub fn attach_storage(&mut self, backend: Arc<dyn Storage>) -> Result<()> {
        let storage = Arc::new(AsyncStorage::new(backend));
        // Sys records first: tags, then index definitions, then schema
        // and replication state.
        if let Some((v, body)) = read_sys_record(storage.as_ref(), SysRecordKind::Tags)? {
            self.tags = TagsMatcher::deserialize(&body)?;
            self.sys_versions.tags = v;
        }
        if let Some((v, body)) = read_sys_record(storage.as_ref(), SysRecordKind::Indexes)? {
            self.sys_versions.indexes = v;
            let defs = decode_indexes_record(&body)?;
            for (def, ft_cfg) in defs {
                self.create_index_internal(def, ft_cfg.as_deref())?;
            }
        }
        if let Some((v, body)) = read_sys_record(storage.as_ref(), SysRecordKind::Schema)? {
            self.sys_versions.schema = v;
            self.schema = Some(String::from_utf8_lossy(&body).into_owned());
        }
        if let Some((v, body)) = read_sys_record(storage.as_ref(), SysRecordKind::Replication)? {
            self.sys_versions.repl = v;
            if body.len() >= 8 {
                let counter = i64::from_le_bytes(body[..8].try_into().expect("8 bytes"));
                self.wal.restore_counter(counter);
            }
        }
        for (key, value) in storage.cursor(META_PREFIX)? {
            let name = String::from_utf8_lossy(&key[META_PREFIX.len()..]).into_owned();
            self.meta
                .insert(name, String::from_utf8_lossy(&value).into_owned());
        }
        // Items: `{lsn: u64, cjson}` under the item prefix.
        let rows = storage.cursor(ITEM_PREFIX)?;
        self.storage = Some(storage);
        let ctx = NsContext {
            loading: true,
            ..NsContext::default()
        };
        for (_, value) in rows {
            if value.len() < 8 {
                return Err(VellumError::ParseBin("truncated item record".to_owned()));
            }
            let lsn = Lsn::from_u64(u64::from_le_bytes(value[..8].try_into().expect("8 bytes")));
            let mut item = Item::from_cjson(&value[8..], &self.payload_type, &self.tags)?;
            item.payload.set_lsn(lsn);
            self.modify_item(&mut item, ItemMode::Upsert, &ctx)?;
        }
        info!(
            namespace = %self.name,
            items = self.items_count(),
            indexes = self.indexes.len(),
            "namespace loaded from storage"
        );
        Ok(())
    }

    /// Flush pending storage writes.
    pub fn flush_storage(&self) -> Result<()> {
        if let Some(storage) = &self.storage {
            storage.flush()?;
        }
        Ok(())
    }

    pub(crate) fn storage(&self) -> Option<&Arc<AsyncStorage>> {
        self.storage.as_ref()
    }

    // ------------------------------------------------------------------
    // Index management
    // ------------------------------------------------------------------

    /// Add an index; on a non-empty namespace existing items are
    /// re-indexed (dense indexes also reshape every payload).
    pub fn add_index(&mut self, def: IndexDef, ft_config_json: Option<&str>) -> Result<()> {
        if self.find_index(&def.name).is_some() {
            return Err(VellumError::Conflict(format!(
                "index '{}' already exists in '{}'",
                def.name, self.name
            )));
        }
        let def_json = encode_index_def(&def, ft_config_json)?;
        self.wal.add(WalRecord::IndexAdd {
            def_json: def_json.clone(),
        });
        let docs = self.render_all_items()?;
        self.create_index_internal(def, ft_config_json)?;
        self.rebuild_items(docs)?;
        self.persist_indexes()?;
        self.mark_updated();
        Ok(())
    }

    /// Replace an index definition, rebuilding its contents.
    pub fn update_index(&mut self, def: IndexDef, ft_config_json: Option<&str>) -> Result<()> {
        let name = def.name.clone();
        if self.find_index(&name).is_none() {
            return Err(VellumError::IndexNotFound {
                ns: self.name.clone(),
                index: name,
            });
        }
        self.drop_index_inner(&def.name.clone())?;
        let def_json = encode_index_def(&def, ft_config_json)?;
        self.wal.add(WalRecord::IndexUpdate { def_json });
        let docs = self.render_all_items()?;
        self.create_index_internal(def, ft_config_json)?;
        self.rebuild_items(docs)?;
        self.persist_indexes()?;
        self.mark_updated();
        Ok(())
    }

    /// Drop an index by name.
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        self.drop_index_inner(name)?;
        self.wal.add(WalRecord::IndexDrop {
            name: name.to_owned(),
        });
        self.persist_indexes()?;
        self.mark_updated();
        Ok(())
    }

    fn drop_index_inner(&mut self, name: &str) -> Result<()> {
        let Some(pos) = self.find_index(name) else {
            return Err(VellumError::IndexNotFound {
                ns: self.name.clone(),
                index: name.to_owned(),
            });
        };
        if self.pk_idx == Some(pos) {
            return Err(VellumError::Logic(format!(
                "cannot drop PK index '{name}'"
            )));
        }
        // Composite indexes referencing a dropped base field must go too.
        let field = match &self.index_sources[pos] {
            IndexSource::Field(f) => Some(*f),
            _ => None,
        };
        if let Some(field) = field {
            let dependent: Vec<String> = self
                .index_sources
                .iter()
                .zip(&self.indexes)
                .filter_map(|(src, idx)| match src {
                    IndexSource::Composite(fields) if fields.contains(&field) => {
                        Some(idx.name().to_owned())
                    }
                    _ => None,
                })
                .collect();
            if !dependent.is_empty() {
                return Err(VellumError::Logic(format!(
                    "index '{name}' is used by composite indexes: {}",
                    dependent.join(", ")
                )));
            }
        }
        let docs = self.render_all_items()?;
        self.indexes.remove(pos);
        self.index_sources.remove(pos);
        if let Some(pk) = self.pk_idx {
            if pk > pos {
                self.pk_idx = Some(pk - 1);
            }
        }
        if let Some(field) = field {
            self.payload_type.drop_field(field)?;
            for src in &mut self.index_sources {
                match src {
                    IndexSource::Field(f) if *f > field => *f -= 1,
                    IndexSource::Composite(fields) => {
                        for f in fields {
                            if *f > field {
                                *f -= 1;
                            }
                        }
                    }
                    IndexSource::Fulltext(sources) => {
                        for s in sources {
                            if let FtSource::Field(f) = s {
                                if *f > field {
                                    *f -= 1;
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        self.rebuild_items(docs)?;
        Ok(())
    }

    fn create_index_internal(
        &mut self,
        def: IndexDef,
        ft_config_json: Option<&str>,
    ) -> Result<()> {
        def.validate()?;
        let source = self.resolve_index_source(&def)?;
        let mut index: Box<dyn Index> = if def.is_fulltext() {
            vellum_ft::create_fulltext_index(def, ft_config_json)?
        } else {
            create_index(def)?
        };
        index.bind_comparator_field(source_comparator(&source));
        if index.def().opts.pk {
            if self.pk_idx.is_some() {
                return Err(VellumError::Conflict(format!(
                    "namespace '{}' already has a PK index",
                    self.name
                )));
            }
            self.pk_idx = Some(self.indexes.len());
        }
        self.indexes.push(index);
        self.index_sources.push(source);
        Ok(())
    }

    fn resolve_index_source(&mut self, def: &IndexDef) -> Result<IndexSource> {
        if def.is_composite() && !def.is_fulltext() {
            let mut fields = Vec::with_capacity(def.json_paths.len());
            for path in &def.json_paths {
                let f = self.payload_type.field_by_json_path(path).ok_or_else(|| {
                    VellumError::Params(format!(
                        "composite index '{}' references unindexed field '{path}'",
                        def.name
                    ))
                })?;
                fields.push(f);
            }
            return Ok(IndexSource::Composite(fields));
        }
        if def.is_fulltext() {
            let mut sources = Vec::with_capacity(def.json_paths.len());
            for path in &def.json_paths {
                match self.payload_type.field_by_json_path(path) {
                    Some(f) => sources.push(FtSource::Field(f)),
                    None => {
                        let tags = self
                            .tags
                            .path_to_tags(path, true)?
                            .unwrap_or_default();
                        sources.push(FtSource::Path {
                            path: path.clone(),
                            tags,
                        });
                    }
                }
            }
            return Ok(IndexSource::Fulltext(sources));
        }
        if def.opts.sparse {
            let path = def.json_paths[0].clone();
            let tags = self.tags.path_to_tags(&path, true)?.unwrap_or_default();
            return Ok(IndexSource::Sparse { path, tags });
        }
        let field = self.payload_type.add_field(
            def.name.clone(),
            def.field_kind,
            def.opts.array,
            def.json_paths.clone(),
        )?;
        Ok(IndexSource::Field(field))
    }

    #[must_use]
    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.indexes.iter().position(|i| i.name() == name)
    }

    /// Persisted index list: magic + layout version + JSON definitions.
    fn persist_indexes(&mut self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let mut body = Vec::new();
        body.extend_from_slice(&SYS_STORAGE_MAGIC.to_le_bytes());
        body.extend_from_slice(&SYS_STORAGE_VERSION.to_le_bytes());
        let defs: Vec<serde_json::Value> = self
            .indexes
            .iter()
            .map(|idx| index_record_json(idx.as_ref()))
            .collect();
        body.extend_from_slice(serde_json::to_string(&defs).unwrap_or_default().as_bytes());
        self.sys_versions.indexes = write_sys_record(
            storage.as_ref() as &dyn Storage,
            SysRecordKind::Indexes,
            self.sys_versions.indexes,
            &body,
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Item lifecycle
    // ------------------------------------------------------------------

    /// Build a staging item for this namespace.
    pub fn new_item(&self, json: &str) -> Result<Item> {
        Item::from_json(json, &self.payload_type, &self.tags)
    }

    #[must_use]
    pub fn items_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_some()).count()
    }

    #[must_use]
    pub fn data_hash(&self) -> u64 {
        self.data_hash
    }

    #[must_use]
    pub fn items_data_size(&self) -> usize {
        self.items_data_size
    }

    /// Modify one item. Returns the affected row id, or `None` for the
    /// Insert-exists / Update-missing no-ops.
    pub fn modify_item(
        &mut self,
        item: &mut Item,
        mode: ItemMode,
        ctx: &NsContext,
    ) -> Result<Option<RowId>> {
        ctx.cx.checkpoint()?;
        if self.slave_mode && !ctx.from_replication && !ctx.loading {
            return Err(VellumError::Logic(format!(
                "namespace '{}' is in slave mode",
                self.name
            )));
        }
        let pk_idx = self.pk_idx.ok_or_else(|| {
            VellumError::Logic(format!("namespace '{}' has no PK index", self.name))
        })?;
        if !self.tags.try_merge(&item.tags) {
            return Err(VellumError::TagsMismatch(format!(
                "item tags are incompatible with namespace '{}'",
                self.name
            )));
        }
        if !ctx.loading {
            self.apply_precepts(item)?;
        }

        let existing = self.find_by_pk(&item.payload, &ctx.cx)?;
        if mode == ItemMode::Delete {
            return match existing {
                Some(row) => {
                    self.do_delete(row, ctx)?;
                    Ok(Some(row))
                }
                None => Ok(None),
            };
        }
        match (mode, existing) {
            (ItemMode::Insert, Some(_)) => return Ok(None),
            (ItemMode::Update, None) => return Ok(None),
            _ => {}
        }

        let row = match existing {
            Some(row) => {
                self.remove_from_indexes(row)?;
                if let Some(old) = self.items.get(row as usize).cloned().flatten() {
                    self.data_hash ^= old.hash();
                    self.items_data_size =
                        self.items_data_size.saturating_sub(payload_size(&old));
                    self.strings.hold_all(old.strings());
                }
                row
            }
            None => match self.free_list.pop() {
                Some(row) => row,
                None => {
                    self.items.push(None);
                    (self.items.len() - 1) as RowId
                }
            },
        };

        // Insert the new values into every index; dense stores hand back
        // the coerced key values, preserved into the payload.
        let mut payload = item.payload.clone();
        for i in 0..self.indexes.len() {
            let keys = self.collect_keys(i, &payload)?;
            let stored = self.indexes[i].upsert(&keys, row)?;
            let dense_field = match &self.index_sources[i] {
                IndexSource::Field(f) => Some(*f),
                _ => None,
            };
            if let Some(f) = dense_field {
                let def = self.indexes[i].def();
                if !def.opts.array && !def.opts.sparse && !def.is_fulltext() && !stored.is_empty()
                {
                    vellum_types::PayloadWriter::new(&self.payload_type, &mut payload)
                        .set(f, stored)?;
                }
            }
        }

        if !ctx.loading {
            let cjson = item.get_cjson()?;
            let lsn = self.wal.add(WalRecord::ItemModify {
                mode: mode.wal_mode(),
                cjson: cjson.clone(),
                tm_version: self.tags.version(),
            });
            payload.set_lsn(lsn);
            self.write_item_record(pk_idx, &payload, &cjson)?;
        }

        self.data_hash ^= payload.hash();
        self.items_data_size += payload_size(&payload);
        self.items[row as usize] = Some(payload);
        self.persist_tags_if_updated()?;
        self.mark_updated();
        Ok(Some(row))
    }

    /// Remove a row by id.
    pub(crate) fn do_delete(&mut self, row: RowId, ctx: &NsContext) -> Result<()> {
        let Some(payload) = self.items.get(row as usize).cloned().flatten() else {
            return Err(VellumError::NotFound(format!("row {row}")));
        };
        self.remove_from_indexes(row)?;
        self.data_hash ^= payload.hash();
        self.items_data_size = self.items_data_size.saturating_sub(payload_size(&payload));
        self.strings.hold_all(payload.strings());
        self.items[row as usize] = None;
        self.free_list.push(row);

        if !ctx.loading {
            let mut item_json = payload_to_json(&self.payload_type, &self.tags, &payload)?;
            // Only the PK is needed to replay a delete.
            if let Some(pk_idx) = self.pk_idx {
                if let IndexSource::Field(f) = &self.index_sources[pk_idx] {
                    let name = self.payload_type.field(*f)?.name.clone();
                    let pk_value = item_json
                        .as_object()
                        .and_then(|obj| obj.get(&name))
                        .cloned();
                    if let Some(pk_value) = pk_value {
                        let mut obj = serde_json::Map::new();
                        obj.insert(name, pk_value);
                        item_json = serde_json::Value::Object(obj);
                    }
                }
            }
            let cjson = vellum_types::cjson::encode(&mut self.tags, &item_json)?;
            self.wal.add(WalRecord::ItemModify {
                mode: MODE_DELETE,
                cjson,
                tm_version: self.tags.version(),
            });
            if let (Some(storage), Some(pk_idx)) = (&self.storage, self.pk_idx) {
                let key = self.item_storage_key(pk_idx, &payload)?;
                storage.remove(&key)?;
            }
        }
        self.mark_updated();
        Ok(())
    }

    fn remove_from_indexes(&mut self, row: RowId) -> Result<()> {
        let Some(old) = self.items.get(row as usize).cloned().flatten() else {
            return Ok(());
        };
        let mut retired = Vec::new();
        for i in 0..self.indexes.len() {
            let keys = self.collect_keys(i, &old)?;
            self.indexes[i].delete(&keys, row, &mut retired)?;
        }
        self.strings.hold_all(retired);
        Ok(())
    }

    /// PK lookup through the PK index.
    pub fn find_by_pk(&self, payload: &PayloadValue, cx: &Cx) -> Result<Option<RowId>> {
        let pk_idx = self.pk_idx.ok_or_else(|| {
            VellumError::Logic(format!("namespace '{}' has no PK index", self.name))
        })?;
        let keys = self.collect_keys(pk_idx, payload)?;
        if keys.is_empty() {
            return Err(VellumError::Params(format!(
                "item has no value for PK index '{}'",
                self.indexes[pk_idx].name()
            )));
        }
        let opts = vellum_index::SelectOpts {
            items_count: self.items.len(),
            ..vellum_index::SelectOpts::default()
        };
        let results = self.indexes[pk_idx].select_key(&keys, CondType::Eq, 0, &opts, cx)?;
        Ok(results
            .first()
            .and_then(|r| r.ids.first())
            .and_then(|ids| ids.iter().next()))
    }

    /// Key values feeding index `i` for one payload.
    pub(crate) fn collect_keys(&self, i: usize, payload: &PayloadValue) -> Result<Vec<Value>> {
        let pl = Payload::new(&self.payload_type, payload);
        Ok(match &self.index_sources[i] {
            IndexSource::Field(f) => pl.get(*f)?,
            IndexSource::Sparse { path, tags } => {
                pl.get_by_json_path(path, tags, &self.tags)?
            }
            IndexSource::Composite(fields) => {
                let mut tuple = Vec::with_capacity(fields.len());
                for &f in fields {
                    tuple.push(pl.get(f)?.into_iter().next().unwrap_or(Value::Null));
                }
                vec![Value::Tuple(tuple)]
            }
            IndexSource::Fulltext(sources) => {
                let mut keys = Vec::with_capacity(sources.len());
                for src in sources {
                    let values = match src {
                        FtSource::Field(f) => pl.get(*f)?,
                        FtSource::Path { path, tags } => {
                            pl.get_by_json_path(path, tags, &self.tags)?
                        }
                    };
                    let joined = values
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_owned))
                        .collect::<Vec<_>>()
                        .join(" ");
                    keys.push(Value::string(joined));
                }
                keys
            }
        })
    }

    fn item_storage_key(&self, pk_idx: usize, payload: &PayloadValue) -> Result<Vec<u8>> {
        let IndexSource::Field(f) = &self.index_sources[pk_idx] else {
            return Err(VellumError::Logic("PK index must be a dense field".to_owned()));
        };
        let mut key = ITEM_PREFIX.to_vec();
        key.extend(Payload::new(&self.payload_type, payload).serialize_fields(&[*f])?);
        Ok(key)
    }

    fn write_item_record(
        &mut self,
        pk_idx: usize,
        payload: &PayloadValue,
        cjson: &[u8],
    ) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let key = self.item_storage_key(pk_idx, payload)?;
        let mut value = Vec::with_capacity(8 + cjson.len());
        value.extend_from_slice(&payload.lsn().to_u64().to_le_bytes());
        value.extend_from_slice(cjson);
        storage.write(&key, &value)?;
        // Replication state rides along so reopen restores the LSN counter.
        self.sys_versions.repl = write_sys_record(
            storage.as_ref() as &dyn Storage,
            SysRecordKind::Replication,
            self.sys_versions.repl,
            &self.wal.next_counter().to_le_bytes(),
        )?;
        Ok(())
    }

    fn persist_tags_if_updated(&mut self) -> Result<()> {
        if !self.tags.is_updated() {
            return Ok(());
        }
        if let Some(storage) = &self.storage {
            self.sys_versions.tags = write_sys_record(
                storage.as_ref() as &dyn Storage,
                SysRecordKind::Tags,
                self.sys_versions.tags,
                &self.tags.serialize(),
            )?;
        }
        self.tags.reset_updated();
        Ok(())
    }

    fn apply_precepts(&mut self, item: &mut Item) -> Result<()> {
        let precepts = item.precepts.clone();
        for precept in &precepts {
            let Some((field, expr)) = precept.split_once('=') else {
                return Err(VellumError::Params(format!("malformed precept '{precept}'")));
            };
            let value = match expr.trim() {
                "serial()" => Value::Int(self.next_serial(field.trim())),
                "now()" => Value::Int(now_unix()),
                other => {
                    return Err(VellumError::Params(format!(
                        "unknown precept expression '{other}'"
                    )));
                }
            };
            item.set_field(&self.payload_type, field.trim(), value)?;
        }
        Ok(())
    }

    fn next_serial(&mut self, field: &str) -> i64 {
        let key = format!("_serial_{field}");
        let next = self
            .meta
            .get(&key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            + 1;
        self.meta.insert(key.clone(), next.to_string());
        if let Some(storage) = &self.storage {
            let mut skey = META_PREFIX.to_vec();
            skey.extend_from_slice(key.as_bytes());
            let _ = storage.write(&skey, next.to_string().as_bytes());
        }
        next
    }

    /// Empty the namespace: items, indexes and the data hash.
    pub fn truncate(&mut self, ctx: &NsContext) -> Result<()> {
        ctx.cx.checkpoint()?;
        for i in 0..self.indexes.len() {
            let fresh = self.recreate_index(i)?;
            self.indexes[i] = fresh;
        }
        for payload in self.items.iter().flatten() {
            self.strings.hold_all(payload.strings());
        }
        self.items.clear();
        self.free_list.clear();
        self.data_hash = 0;
        self.items_data_size = 0;
        if !ctx.loading && !ctx.in_transaction {
            self.wal.add(WalRecord::UpdateQuery {
                sql: format!("TRUNCATE {}", self.name),
            });
        }
        if let Some(storage) = &self.storage {
            for (key, _) in storage.cursor(ITEM_PREFIX)? {
                storage.remove(&key)?;
            }
        }
        self.mark_updated();
        Ok(())
    }

    fn recreate_index(&self, i: usize) -> Result<Box<dyn Index>> {
        let def = self.indexes[i].def().clone();
        let mut fresh: Box<dyn Index> = if def.is_fulltext() {
            let cfg = self.indexes[i]
                .as_any()
                .downcast_ref::<FtFastIndex>()
                .map(|ft| ft.config().clone());
            match cfg {
                Some(cfg) => Box::new(FtFastIndex::new(def, cfg)?),
                None => vellum_ft::create_fulltext_index(def, None)?,
            }
        } else {
            create_index(def)?
        };
        fresh.bind_comparator_field(source_comparator(&self.index_sources[i]));
        fresh.set_sort_id(self.indexes[i].sort_id());
        Ok(fresh)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Execute a select against this namespace. Join sub-queries must be
    /// pre-resolved by the caller (the `Db` facade owns cross-namespace
    /// access).
    pub fn select(
        &self,
        query: &Query,
        joins: &[selector::JoinData],
        cx: &Cx,
    ) -> Result<QueryResults> {
        selector::execute(self, query, joins, cx)
    }

    /// Apply an UPDATE query: select, rewrite, re-upsert. Emits one
    /// statement WAL record for the whole batch.
    pub fn update_query(&mut self, query: &Query, cx: &Cx) -> Result<QueryResults> {
        let matched = self.select(query, &[], cx)?;
        self.wal.add(WalRecord::UpdateQuery {
            sql: query.to_sql(),
        });
        let ctx = NsContext {
            cx: cx.clone(),
            in_transaction: true,
            ..NsContext::default()
        };
        for row in &matched.rows {
            cx.checkpoint()?;
            let json = payload_to_json(&self.payload_type, &self.tags, &row.payload)?;
            let updated = crate::itemmodifier::apply_update_entries(
                json,
                &query.update_entries,
                |field| self.eval_serial(field),
            )?;
            let mut item =
                Item::from_json_value(updated, &self.payload_type, &self.tags)?;
            self.modify_item(&mut item, ItemMode::Upsert, &ctx)?;
        }
        Ok(matched)
    }

    fn eval_serial(&mut self, field: &str) -> i64 {
        self.next_serial(field)
    }

    /// Apply a DELETE query; one statement WAL record.
    pub fn delete_query(&mut self, query: &Query, cx: &Cx) -> Result<QueryResults> {
        let matched = self.select(query, &[], cx)?;
        self.wal.add(WalRecord::UpdateQuery {
            sql: query.to_sql(),
        });
        let ctx = NsContext {
            cx: cx.clone(),
            in_transaction: true,
            ..NsContext::default()
        };
        for row in &matched.rows {
            cx.checkpoint()?;
            self.do_delete(row.row_id, &ctx)?;
        }
        Ok(matched)
    }

    // ------------------------------------------------------------------
    // Meta & schema
    // ------------------------------------------------------------------

    pub fn put_meta(&mut self, key: &str, value: &str) -> Result<()> {
        self.meta.insert(key.to_owned(), value.to_owned());
        self.wal.add(WalRecord::PutMeta {
            key: key.to_owned(),
            value: value.as_bytes().to_vec(),
        });
        if let Some(storage) = &self.storage {
            let mut skey = META_PREFIX.to_vec();
            skey.extend_from_slice(key.as_bytes());
            storage.write(&skey, value.as_bytes())?;
        }
        Ok(())
    }

    #[must_use]
    pub fn get_meta(&self, key: &str) -> Option<String> {
        self.meta.get(key).cloned()
    }

    #[must_use]
    pub fn enum_meta(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.meta.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn set_schema(&mut self, schema: &str) -> Result<()> {
        serde_json::from_str::<serde_json::Value>(schema)
            .map_err(|e| VellumError::Params(format!("schema is not valid JSON: {e}")))?;
        self.schema = Some(schema.to_owned());
        self.wal.add(WalRecord::SetSchema {
            schema: schema.to_owned(),
        });
        if let Some(storage) = &self.storage {
            self.sys_versions.schema = write_sys_record(
                storage.as_ref() as &dyn Storage,
                SysRecordKind::Schema,
                self.sys_versions.schema,
                schema.as_bytes(),
            )?;
        }
        Ok(())
    }

    #[must_use]
    pub fn get_schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    // ------------------------------------------------------------------
    // Background maintenance
    // ------------------------------------------------------------------

    pub(crate) fn mark_updated(&mut self) {
        self.last_update = Instant::now();
        self.optimized = false;
        self.count_cache.lock().clear();
    }

    /// True when the idle window has passed and optimization should run.
    #[must_use]
    pub fn needs_optimization(&self) -> bool {
        !self.optimized && self.last_update.elapsed() >= self.config.optimization_timeout
    }

    /// Commit per-index structures and build sort orders. Restartable: a
    /// concurrent write resets the state and a later pass redoes it.
    pub fn optimize_indexes(&mut self, cx: &Cx) -> Result<()> {
        cx.checkpoint()?;
        for index in &mut self.indexes {
            index.commit();
        }
        let mut sorted = 0u16;
        for index in &mut self.indexes {
            if index.is_ordered() {
                sorted += 1;
                index.set_sort_id(sorted);
            }
        }
        self.sorted_count = sorted as usize;
        let mut ctx = SortOrdersCtx::new(self.items.len(), self.sorted_count);
        for index in &mut self.indexes {
            cx.checkpoint()?;
            index.make_sort_orders(&mut ctx);
        }
        let workers = self.config.optimization_sort_workers.max(1);
        let chunk_size = self.indexes.len().div_ceil(workers).max(1);
        let ctx_ref = &ctx;
        std::thread::scope(|scope| {
            for chunk in self.indexes.chunks_mut(chunk_size) {
                scope.spawn(move || {
                    for index in chunk {
                        index.update_sorted_ids(ctx_ref);
                    }
                });
            }
        });
        self.optimized = true;
        debug!(namespace = %self.name, sorted_indexes = self.sorted_count, "indexes optimized");
        Ok(())
    }

    /// Commit dirty full-text indexes; callers hold the write lock.
    pub fn commit_fulltext(&mut self) {
        for index in &mut self.indexes {
            if let Some(ft) = index.as_any_mut().downcast_mut::<FtFastIndex>() {
                ft.commit_fulltext();
            }
        }
    }

    #[must_use]
    pub fn has_dirty_fulltext(&self) -> bool {
        self.indexes.iter().any(|index| {
            index
                .as_any()
                .downcast_ref::<FtFastIndex>()
                .is_some_and(FtFastIndex::is_dirty)
        })
    }

    /// Delete rows whose TTL-indexed timestamp has expired.
    pub fn scan_ttl(&mut self, cx: &Cx) -> Result<usize> {
        let mut expired_queries = Vec::new();
        for index in &self.indexes {
            let def = index.def();
            if let Some(ttl) = def.expire_after {
                let cutoff = now_unix() - ttl;
                expired_queries.push(
                    Query::new(self.name.clone())
                        .where_cond(def.name.clone(), CondType::Lt, vec![Value::Int(cutoff)]),
                );
            }
        }
        let mut removed = 0;
        for mut query in expired_queries {
            query.query_type = QueryType::Delete;
            removed += self.delete_query(&query, cx)?.len();
        }
        Ok(removed)
    }

    /// Release retired strings nothing references anymore.
    pub fn drain_strings(&mut self) {
        self.strings.drain();
    }

    pub fn mem_stats(&self) -> Vec<IndexMemStat> {
        self.indexes.iter().map(|i| i.mem_stat()).collect()
    }

    // ------------------------------------------------------------------
    // Copy support (transactions)
    // ------------------------------------------------------------------

    /// Clone this namespace for a copy-mode transaction commit. Payloads
    /// are shared copy-on-write; indexes are deep-cloned.
    #[must_use]
    pub fn clone_for_tx(&self) -> Self {
        Self {
            name: self.name.clone(),
            payload_type: self.payload_type.clone(),
            tags: self.tags.clone(),
            indexes: self.indexes.iter().map(|i| i.clone_index()).collect(),
            index_sources: self.index_sources.clone(),
            items: self.items.clone(),
            free_list: self.free_list.clone(),
            pk_idx: self.pk_idx,
            data_hash: self.data_hash,
            items_data_size: self.items_data_size,
            wal: self.wal.clone(),
            storage: self.storage.clone(),
            sys_versions: self.sys_versions,
            meta: self.meta.clone(),
            schema: self.schema.clone(),
            strings: StringsHolder::new(),
            config: self.config.clone(),
            slave_mode: self.slave_mode,
            sorted_count: self.sorted_count,
            last_update: self.last_update,
            optimized: self.optimized,
            count_cache: Mutex::new(HashMap::new()),
            invalidated: false,
        }
    }

    // ------------------------------------------------------------------
    // Rebuild helpers (index add/drop)
    // ------------------------------------------------------------------

    /// Render every live row to JSON before a payload reshape.
    fn render_all_items(&self) -> Result<Vec<(RowId, serde_json::Value)>> {
        let mut docs = Vec::new();
        for (row, payload) in self.items.iter().enumerate() {
            if let Some(payload) = payload {
                docs.push((
                    row as RowId,
                    payload_to_json(&self.payload_type, &self.tags, payload)?,
                ));
            }
        }
        Ok(docs)
    }

    /// Rebuild payloads and re-feed every index after a shape change.
    fn rebuild_items(&mut self, docs: Vec<(RowId, serde_json::Value)>) -> Result<()> {
        for i in 0..self.indexes.len() {
            let fresh = self.recreate_index(i)?;
            self.indexes[i] = fresh;
        }
        self.data_hash = 0;
        self.items_data_size = 0;
        for (row, json) in docs {
            let mut item =
                Item::from_json_value(json, &self.payload_type, &self.tags)?;
            let old_lsn = self.items[row as usize]
                .as_ref()
                .map_or(Lsn::EMPTY, PayloadValue::lsn);
            item.payload.set_lsn(old_lsn);
            if !self.tags.try_merge(&item.tags) {
                return Err(VellumError::TagsMismatch(
                    "tags diverged during reindex".to_owned(),
                ));
            }
            for i in 0..self.indexes.len() {
                let keys = self.collect_keys(i, &item.payload)?;
                self.indexes[i].upsert(&keys, row)?;
            }
            self.data_hash ^= item.payload.hash();
            self.items_data_size += payload_size(&item.payload);
            self.items[row as usize] = Some(item.payload);
        }
        Ok(())
    }

    #[must_use]
    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    pub(crate) fn wal_mut(&mut self) -> &mut Wal {
        &mut self.wal
    }
}

fn source_comparator(source: &IndexSource) -> ComparatorField {
    match source {
        IndexSource::Field(f) => ComparatorField::Field(*f),
        IndexSource::Sparse { path, tags } => ComparatorField::Json {
            path: path.clone(),
            tags: tags.clone(),
        },
        IndexSource::Composite(fields) => ComparatorField::Composite(fields.clone()),
        // Full-text indexes never fall back to comparators; the field
        // binding is unused.
        IndexSource::Fulltext(_) => ComparatorField::Field(0),
    }
}

fn payload_size(payload: &PayloadValue) -> usize {
    payload.strings().iter().map(|s| s.len()).sum::<usize>() + 64
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn index_record_json(index: &dyn Index) -> serde_json::Value {
    let mut obj = serde_json::to_value(index.def()).unwrap_or_default();
    if let Some(ft) = index.as_any().downcast_ref::<FtFastIndex>() {
        if let (serde_json::Value::Object(map), Ok(cfg)) =
            (&mut obj, serde_json::to_value(ft.config()))
        {
            map.insert("config".to_owned(), cfg);
        }
    }
    obj
}

fn encode_index_def(def: &IndexDef, ft_config_json: Option<&str>) -> Result<String> {
    let mut obj = serde_json::to_value(def)
        .map_err(|e| VellumError::Params(format!("index def: {e}")))?;
    if let (Some(cfg), serde_json::Value::Object(map)) = (ft_config_json, &mut obj) {
        let cfg: serde_json::Value = serde_json::from_str(cfg)
            .map_err(|e| VellumError::Params(format!("ft config: {e}")))?;
        map.insert("config".to_owned(), cfg);
    }
    serde_json::to_string(&obj).map_err(|e| VellumError::Params(e.to_string()))
}

fn decode_indexes_record(body: &[u8]) -> Result<Vec<(IndexDef, Option<String>)>> {
    if body.len() < 8 {
        return Err(VellumError::ParseBin("indexes record too short".to_owned()));
    }
    let magic = u32::from_le_bytes(body[..4].try_into().expect("4 bytes"));
    if magic != SYS_STORAGE_MAGIC {
        return Err(VellumError::ParseBin(format!(
            "bad indexes record magic {magic:#x}"
        )));
    }
    let version = u32::from_le_bytes(body[4..8].try_into().expect("4 bytes"));
    if version > SYS_STORAGE_VERSION {
        return Err(VellumError::ParseBin(format!(
            "unsupported storage version {version:#x}"
        )));
    }
    let defs: Vec<serde_json::Value> = serde_json::from_slice(&body[8..])
        .map_err(|e| VellumError::ParseBin(format!("indexes record: {e}")))?;
    let mut out = Vec::with_capacity(defs.len());
    for mut def_json in defs {
        let cfg = def_json
            .as_object_mut()
            .and_then(|map| map.remove("config"))
            .map(|v| v.to_string());
        let def: IndexDef = serde_json::from_value(def_json)
            .map_err(|e| VellumError::ParseBin(format!("index def: {e}")))?;
        out.push((def, cfg));
    }
    Ok(out)
}
