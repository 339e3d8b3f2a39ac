// SPDX-License-Identifier: MIT OR Apache-2.0

//! Eventually consistent resolution of references between records across datasets.
//!
//! A document may reference records which have not arrived yet. The resolver keeps those forward
//! references in a pending index keyed by the *missing* endpoint's record key — lookup instead of
//! live pointers, so the relation graph never forms reference cycles between documents. When the
//! missing record arrives, everything waiting on it is drained and the referencing records are
//! re-published with their now-resolvable links.
use serde_json::Value;
use stroom_core::key::KeyError;
use stroom_core::schema::{RelationTarget, TableSchema};
use stroom_core::{Document, Fields, RecordKey, RelationKey};
use stroom_store::{DocumentStore, RelationStore, StoreError};
use tracing::warn;

/// Maintains the pending-relations index around the document store.
#[derive(Clone, Debug)]
pub struct RelationResolver<S> {
    store: S,
}

impl<S> RelationResolver<S>
where
    S: DocumentStore + RelationStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Scans a freshly merged document for relation fields and registers every reference whose
    /// target is not live yet. Returns the relations left pending.
    ///
    /// Relation values which carry no usable identity are skipped with a warning; the document
    /// itself is already committed and a broken link must not fail the event.
    pub async fn register(
        &mut self,
        table: &TableSchema,
        document: &Document,
    ) -> Result<Vec<RelationKey>, StoreError> {
        let mut pending = Vec::new();
        for field in table.relation_fields() {
            let Some(value) = document.fields.get(&field.name) else {
                continue;
            };
            let target = field
                .relation
                .as_ref()
                .expect("relation_fields only yields relation fields");
            let target_key = match relation_value_key(target, &field.name, value) {
                Ok(Some(target_key)) => target_key,
                Ok(None) => continue,
                Err(err) => {
                    warn!(key = %document.key, field = %field.name, %err,
                        "unusable relation value, skipping");
                    continue;
                }
            };

            if self.store.is_live(&target_key).await? {
                continue;
            }
            let relation = RelationKey::new(document.key.clone(), target_key.clone());
            if self.store.add_pending(&target_key, relation.clone()).await? {
                pending.push(relation);
            }
        }
        Ok(pending)
    }

    /// Drains all relations waiting for `key` and returns the referencing records, deduplicated,
    /// for re-publication. Call when a record became live.
    pub async fn arrived(&mut self, key: &RecordKey) -> Result<Vec<RecordKey>, StoreError> {
        let relations = self.store.take_pending(key).await?;
        let mut referrers: Vec<RecordKey> = Vec::with_capacity(relations.len());
        for relation in relations {
            if !referrers.contains(&relation.left) {
                referrers.push(relation.left);
            }
        }
        Ok(referrers)
    }
}

/// Derives the target record key from a relation field value.
///
/// Values come as a bare identity (string or integer) or as an object carrying the target's
/// identity fields; null means no reference.
pub fn relation_value_key(
    target: &RelationTarget,
    field: &str,
    value: &Value,
) -> Result<Option<RecordKey>, KeyError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) if text.is_empty() => Ok(None),
        Value::Object(identity) => {
            let id_value = identity
                .get("identificatie")
                .ok_or_else(|| KeyError::MissingIdentity(field.to_owned()))?;
            let volgnummer = match identity.get("volgnummer") {
                None | Some(Value::Null) => None,
                Some(Value::Number(number)) => Some(
                    number
                        .as_u64()
                        .ok_or_else(|| KeyError::InvalidVolgnummer(field.to_owned()))?,
                ),
                Some(_) => return Err(KeyError::InvalidVolgnummer(field.to_owned())),
            };
            Ok(Some(RecordKey::from_value(
                &target.dataset,
                &target.table,
                field,
                id_value,
                volgnummer,
            )?))
        }
        value => Ok(Some(RecordKey::from_value(
            &target.dataset,
            &target.table,
            field,
            value,
            None,
        )?)),
    }
}

/// Builds the publishable field mapping of a document, annotating resolved relations.
///
/// For every relation field whose target document is live in the store, the value is published in
/// object form extended with the target's current revision. Unresolved references are published
/// as-is. The document itself is never mutated by resolution, so its revision stays exact; the
/// annotation is derived at publish time, which is what makes a re-publication after resolution
/// carry a different snapshot.
pub async fn annotate_relations<S>(
    store: &S,
    table: &TableSchema,
    document: &Document,
) -> Result<Fields, StoreError>
where
    S: DocumentStore,
{
    let mut fields = document.fields.clone();
    for field in table.relation_fields() {
        let Some(value) = fields.get(&field.name) else {
            continue;
        };
        let target = field
            .relation
            .as_ref()
            .expect("relation_fields only yields relation fields");
        let Ok(Some(target_key)) = relation_value_key(target, &field.name, value) else {
            continue;
        };

        let Some(state) = store.get(&target_key).await? else {
            continue;
        };
        let Some(target_document) = state.as_live() else {
            continue;
        };

        let mut resolved = Fields::new();
        resolved.insert(
            "identificatie".to_owned(),
            Value::String(target_key.identificatie.clone()),
        );
        if let Some(volgnummer) = target_key.volgnummer {
            resolved.insert("volgnummer".to_owned(), volgnummer.into());
        }
        resolved.insert("revision".to_owned(), target_document.revision.into());
        fields.insert(field.name.clone(), Value::Object(resolved));
    }
    Ok(fields)
}
