//! Field-level comparison and merge of two records.
//!
//! Comparison and automatic resolution are pure. Executing a merge writes the
//! merged field map into the target record and emits, in order: one DES, one
//! SYN per resolved field, one ALT per field whose value in the target
//! changed, and one closing CON. The [`MergeAudit`] lists those records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use commons_types::{
    Actor, EoKind, FieldComparison, FieldResolution, FieldStatus, Frame, MergeAudit, MergeId,
    MergeRecord, MergeStrategy, RecordComparison, RecordRef, ResolutionSource, RoomId,
    Visibility,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::{LedgerError, LedgerResult};
use crate::{keys, ResourceLedger};

/// Compare two records field by field. Fields are reported in key order.
pub fn compare_records(a: &MergeRecord, b: &MergeRecord) -> RecordComparison {
    let keys: BTreeSet<&String> = a.fields.keys().chain(b.fields.keys()).collect();
    let fields = keys
        .into_iter()
        .map(|key| {
            let from_a = a.fields.get(key);
            let from_b = b.fields.get(key);
            let status = match (from_a, from_b) {
                (Some(x), Some(y)) if x.value == y.value => FieldStatus::Match,
                (Some(_), Some(_)) => FieldStatus::Conflict,
                (Some(_), None) => FieldStatus::OnlyA,
                (None, _) => FieldStatus::OnlyB,
            };
            FieldComparison {
                key: key.clone(),
                status,
                from_a: from_a.map(|f| f.value.clone()),
                from_b: from_b.map(|f| f.value.clone()),
                updated_a: from_a.and_then(|f| f.updated_at),
                updated_b: from_b.and_then(|f| f.updated_at),
            }
        })
        .collect();

    RecordComparison {
        source_a: a.reference.clone(),
        source_b: b.reference.clone(),
        fields,
    }
}

/// Resolve every field the strategy can decide. Conflicts under
/// [`MergeStrategy::Manual`] stay unresolved.
pub fn auto_resolve(comparison: &RecordComparison, strategy: MergeStrategy) -> Vec<FieldResolution> {
    comparison
        .fields
        .iter()
        .map(|field| {
            let (resolved, source) = match field.status {
                FieldStatus::Match => (field.from_a.clone(), ResolutionSource::Both),
                FieldStatus::OnlyA => (field.from_a.clone(), ResolutionSource::SourceA),
                FieldStatus::OnlyB => (field.from_b.clone(), ResolutionSource::SourceB),
                FieldStatus::Conflict => match pick_side(field, strategy) {
                    Some(ResolutionSource::SourceB) => {
                        (field.from_b.clone(), ResolutionSource::SourceB)
                    }
                    Some(_) => (field.from_a.clone(), ResolutionSource::SourceA),
                    None => (None, ResolutionSource::Unresolved),
                },
            };
            FieldResolution {
                key: field.key.clone(),
                from_a: field.from_a.clone(),
                from_b: field.from_b.clone(),
                resolved,
                source,
            }
        })
        .collect()
}

fn pick_side(field: &FieldComparison, strategy: MergeStrategy) -> Option<ResolutionSource> {
    match strategy {
        MergeStrategy::SourceA => Some(ResolutionSource::SourceA),
        MergeStrategy::SourceB => Some(ResolutionSource::SourceB),
        MergeStrategy::Manual => None,
        // Ties and missing timestamps favour A.
        MergeStrategy::Newest => match (field.updated_a, field.updated_b) {
            (Some(a), Some(b)) if b > a => Some(ResolutionSource::SourceB),
            (None, Some(_)) => Some(ResolutionSource::SourceB),
            _ => Some(ResolutionSource::SourceA),
        },
    }
}

/// Set a manual value for `key`.
pub fn resolve_field(resolutions: &mut [FieldResolution], key: &str, value: Value) -> LedgerResult<()> {
    let field = resolutions
        .iter_mut()
        .find(|r| r.key == key)
        .ok_or_else(|| LedgerError::validation(format!("no field {key:?} in this merge")))?;
    field.resolved = Some(value);
    field.source = ResolutionSource::Manual;
    Ok(())
}

/// Everything needed to execute one merge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeRequest {
    pub target: RecordRef,
    pub source_a: RecordRef,
    pub source_b: RecordRef,
    pub resolutions: Vec<FieldResolution>,
    pub strategy: MergeStrategy,
    pub effective_date: DateTime<Utc>,
}

impl MergeRequest {
    pub fn new(
        target: RecordRef,
        comparison: &RecordComparison,
        resolutions: Vec<FieldResolution>,
        strategy: MergeStrategy,
    ) -> Self {
        Self {
            target,
            source_a: comparison.source_a.clone(),
            source_b: comparison.source_b.clone(),
            resolutions,
            strategy,
            effective_date: Utc::now(),
        }
    }

    pub fn effective(mut self, at: DateTime<Utc>) -> Self {
        self.effective_date = at;
        self
    }
}

impl ResourceLedger {
    /// Write the resolved fields into the target record and audit the merge.
    pub async fn execute_merge(&self, request: MergeRequest, actor: &Actor) -> LedgerResult<MergeAudit> {
        if request.resolutions.is_empty() {
            return Err(LedgerError::validation("merge has no fields"));
        }
        let unresolved: Vec<&str> = request
            .resolutions
            .iter()
            .filter(|r| !r.is_resolved())
            .map(|r| r.key.as_str())
            .collect();
        if !unresolved.is_empty() {
            return Err(LedgerError::validation(format!(
                "unresolved fields: {}",
                unresolved.join(", ")
            )));
        }

        let target = &request.target;
        let current = match self
            .store
            .get_state(&target.room, &target.event_type, &target.key)
            .await?
        {
            None => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(LedgerError::validation(format!(
                    "target {} is not a field map",
                    target.path()
                )))
            }
        };

        let mut merged = current.clone();
        let mut altered = Vec::new();
        for field in &request.resolutions {
            let Some(value) = field.resolved.clone() else {
                continue;
            };
            if current.get(&field.key) != Some(&value) {
                altered.push(field.key.clone());
            }
            merged.insert(field.key.clone(), value);
        }

        self.store
            .set_state(&target.room, &target.event_type, Value::Object(merged.clone()), &target.key)
            .await?;

        let merge_id = MergeId::generate();
        let room = &target.room;
        let mut records = Vec::new();

        records.extend(
            self.emit(
                room,
                EoKind::Des,
                keys::merge_path(&merge_id),
                json!({
                    "source_a": request.source_a.path(),
                    "source_b": request.source_b.path(),
                    "target": target.path(),
                    "strategy": request.strategy,
                    "effective_date": request.effective_date,
                    "fields": request.resolutions.len(),
                    "by": actor.user_id,
                }),
                Frame::meant(Visibility::Org, room),
            )
            .await,
        );

        for field in &request.resolutions {
            records.extend(
                self.emit(
                    room,
                    EoKind::Syn,
                    keys::merge_field_path(&merge_id, &field.key),
                    json!({
                        "key": field.key,
                        "from_a": field.from_a,
                        "from_b": field.from_b,
                        "resolved": field.resolved,
                        "source": field.source,
                        "effective_date": request.effective_date,
                    }),
                    Frame::meant(Visibility::Org, room),
                )
                .await,
            );
        }

        for key in &altered {
            records.extend(
                self.emit(
                    room,
                    EoKind::Alt,
                    keys::merge_field_path(&merge_id, key),
                    json!({
                        "key": key,
                        "from": current.get(key),
                        "to": merged.get(key),
                        "target": target.path(),
                        "effective_date": request.effective_date,
                    }),
                    Frame::given(Visibility::Org, room),
                )
                .await,
            );
        }

        records.extend(
            self.emit(
                room,
                EoKind::Con,
                keys::merge_path(&merge_id),
                json!({
                    "source_a": request.source_a.path(),
                    "source_b": request.source_b.path(),
                    "target": target.path(),
                    "chain": records,
                }),
                Frame::meant(Visibility::Org, room),
            )
            .await,
        );

        let audit = MergeAudit {
            merge_id: merge_id.clone(),
            source_a: request.source_a.clone(),
            source_b: request.source_b.clone(),
            target: target.clone(),
            strategy: request.strategy,
            effective_date: request.effective_date,
            fields: request.resolutions.clone(),
            altered_fields: altered,
            records,
            completed_by: actor.user_id.clone(),
            completed_at: Utc::now(),
        };
        self.save(room, keys::MERGE_AUDIT, merge_id.as_str(), &audit)
            .await?;

        info!(
            merge = %merge_id,
            target = %target.path(),
            fields = audit.fields.len(),
            altered = audit.altered_fields.len(),
            "Executed merge"
        );
        Ok(audit)
    }

    pub async fn get_merge_audit(&self, room: &RoomId, merge_id: &MergeId) -> LedgerResult<Option<MergeAudit>> {
        self.load(room, keys::MERGE_AUDIT, merge_id.as_str()).await
    }
}
