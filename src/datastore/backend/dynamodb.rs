//! `Backend` over a real typed key-value datastore (Amazon DynamoDB),
//! standing in for the application-platform datastore spec.md §1
//! describes in the abstract.
//!
//! Grounded in `disk_store::gcs_writer`/`azure_writer`: a synchronous
//! trait implementation wrapping an async cloud SDK client, and in
//! `disk_store/mod.rs`'s `lazy_static! { static ref RT: tokio::runtime::Runtime ... }`
//! for bridging the two.

use std::collections::HashMap;

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, TransactWriteItem};
use aws_sdk_dynamodb::Client;
use lazy_static::lazy_static;
use log::warn;

use crate::datastore::{wrap_io_err, Entity, Key, Property, Tx};
use crate::error::Result;

use super::Backend;

lazy_static! {
    static ref RT: tokio::runtime::Runtime = tokio::runtime::Runtime::new()
        .expect("failed to start tokio runtime for the DynamoDB backend");
}

/// DynamoDB's own per-request ceilings, stricter than the platform
/// limits in spec.md §4.1; the client-level batching in
/// `DatastoreClient` already chunks to the spec's numbers, this is the
/// backend further chunking to what the concrete API actually allows.
const BATCH_GET_LIMIT: usize = 100;
const BATCH_WRITE_LIMIT: usize = 25;
const TRANSACT_WRITE_LIMIT: usize = 100;

/// `BatchWriteItem`/`BatchGetItem` can return `Ok` with leftover
/// `unprocessed_items`/`unprocessed_keys` (throttling, internal
/// limits) instead of an error. Resubmit the leftovers this many times
/// before giving up and surfacing a hard error — spec.md §4.8 forbids
/// treating a partially-applied batch as a clean success.
const MAX_UNPROCESSED_RETRIES: u32 = 5;

const PK_ATTR: &str = "pk";
const PROPS_ATTR: &str = "properties";

pub struct DynamoDbBackend {
    client: Client,
    table: String,
}

impl DynamoDbBackend {
    /// Builds a client from the ambient AWS environment (credentials,
    /// region) — the same discovery `aws-config` always does, nothing
    /// datastore-specific about it.
    pub fn new(table: impl Into<String>) -> DynamoDbBackend {
        let config = RT.block_on(aws_config::load_from_env());
        DynamoDbBackend {
            client: Client::new(&config),
            table: table.into(),
        }
    }

    fn item_to_entity(item: &HashMap<String, AttributeValue>) -> Entity {
        let mut entity = Entity::default();
        if let Some(AttributeValue::M(props)) = item.get(PROPS_ATTR) {
            for (name, value) in props {
                if let Some(property) = attribute_to_property(value) {
                    entity.properties.insert(name.clone(), property);
                }
            }
        }
        entity
    }

    fn entity_to_item(key: &Key, entity: &Entity) -> HashMap<String, AttributeValue> {
        let mut props = HashMap::new();
        for (name, value) in &entity.properties {
            props.insert(name.clone(), property_to_attribute(value));
        }
        let mut item = HashMap::new();
        item.insert(PK_ATTR.to_string(), AttributeValue::S(key.to_string()));
        item.insert(PROPS_ATTR.to_string(), AttributeValue::M(props));
        item
    }

    /// Submits one chunk of `WriteRequest`s, resubmitting whatever
    /// `BatchWriteItem` leaves in `unprocessed_items` until the chunk
    /// drains or `MAX_UNPROCESSED_RETRIES` is exhausted.
    fn send_batch_write(
        &self,
        requests: Vec<aws_sdk_dynamodb::types::WriteRequest>,
    ) -> Result<()> {
        let mut pending = HashMap::from([(self.table.clone(), requests)]);
        for attempt in 0..=MAX_UNPROCESSED_RETRIES {
            let output = RT
                .block_on(
                    self.client
                        .batch_write_item()
                        .set_request_items(Some(pending))
                        .send(),
                )
                .map_err(|e| wrap_io_err("DynamoDB BatchWriteItem", e))?;

            let unprocessed = output.unprocessed_items.unwrap_or_default();
            let remaining: usize = unprocessed.values().map(|reqs| reqs.len()).sum();
            if remaining == 0 {
                return Ok(());
            }
            if attempt == MAX_UNPROCESSED_RETRIES {
                return Err(wrap_io_err(
                    "DynamoDB BatchWriteItem",
                    format!(
                        "{remaining} write(s) remained unprocessed after {MAX_UNPROCESSED_RETRIES} retries"
                    ),
                ));
            }
            warn!("BatchWriteItem left {remaining} write(s) unprocessed, retrying");
            pending = unprocessed;
        }
        Ok(())
    }
}

fn property_to_attribute(property: &Property) -> AttributeValue {
    match property {
        Property::Str(s) => AttributeValue::S(s.clone()),
        Property::Int(i) => AttributeValue::N(i.to_string()),
        Property::Bytes(b) => AttributeValue::B(Blob::new(b.clone())),
        Property::KeyList(keys) => {
            AttributeValue::L(keys.iter().map(|k| AttributeValue::S(k.encode())).collect())
        }
    }
}

fn attribute_to_property(value: &AttributeValue) -> Option<Property> {
    match value {
        AttributeValue::S(s) => Some(Property::Str(s.clone())),
        AttributeValue::N(n) => n.parse::<i64>().ok().map(Property::Int),
        AttributeValue::B(b) => Some(Property::Bytes(b.clone().into_inner())),
        AttributeValue::L(items) => Some(Property::KeyList(
            items
                .iter()
                .filter_map(|v| match v {
                    AttributeValue::S(s) => Key::decode(s),
                    _ => None,
                })
                .collect(),
        )),
        _ => {
            warn!("unsupported DynamoDB attribute type encountered");
            None
        }
    }
}

impl Backend for DynamoDbBackend {
    fn get(&self, key: &Key) -> Result<Option<Entity>> {
        let output = RT
            .block_on(
                self.client
                    .get_item()
                    .table_name(&self.table)
                    .key(PK_ATTR, AttributeValue::S(key.to_string()))
                    .send(),
            )
            .map_err(|e| wrap_io_err("DynamoDB GetItem", e))?;
        Ok(output.item.map(|item| Self::item_to_entity(&item)))
    }

    fn get_many(&self, keys: &[Key]) -> Result<HashMap<Key, Entity>> {
        let mut result = HashMap::new();
        for chunk in keys.chunks(BATCH_GET_LIMIT) {
            let mut keys_and_attrs = aws_sdk_dynamodb::types::KeysAndAttributes::builder();
            for key in chunk {
                keys_and_attrs = keys_and_attrs
                    .keys(HashMap::from([(
                        PK_ATTR.to_string(),
                        AttributeValue::S(key.to_string()),
                    )]));
            }
            let request = keys_and_attrs
                .build()
                .map_err(|e| wrap_io_err("DynamoDB BatchGetItem request", e))?;
            let mut pending = HashMap::from([(self.table.clone(), request)]);

            for attempt in 0..=MAX_UNPROCESSED_RETRIES {
                let output = RT
                    .block_on(
                        self.client
                            .batch_get_item()
                            .set_request_items(Some(pending))
                            .send(),
                    )
                    .map_err(|e| wrap_io_err("DynamoDB BatchGetItem", e))?;
                if let Some(tables) = &output.responses {
                    if let Some(items) = tables.get(&self.table) {
                        for item in items {
                            if let Some(AttributeValue::S(pk)) = item.get(PK_ATTR) {
                                let entity = Self::item_to_entity(item);
                                if let Some(key) = chunk.iter().find(|k| &k.to_string() == pk) {
                                    result.insert(key.clone(), entity);
                                }
                            }
                        }
                    }
                }

                let unprocessed = output.unprocessed_keys.unwrap_or_default();
                let remaining: usize = unprocessed.values().map(|ka| ka.keys().len()).sum();
                if remaining == 0 {
                    break;
                }
                if attempt == MAX_UNPROCESSED_RETRIES {
                    return Err(wrap_io_err(
                        "DynamoDB BatchGetItem",
                        format!(
                            "{remaining} key(s) remained unprocessed after {MAX_UNPROCESSED_RETRIES} retries"
                        ),
                    ));
                }
                warn!("BatchGetItem left {remaining} key(s) unprocessed, retrying");
                pending = unprocessed;
            }
        }
        Ok(result)
    }

    fn put(&self, key: &Key, entity: Entity) -> Result<()> {
        RT.block_on(
            self.client
                .put_item()
                .table_name(&self.table)
                .set_item(Some(Self::entity_to_item(key, &entity)))
                .send(),
        )
        .map_err(|e| wrap_io_err("DynamoDB PutItem", e))?;
        Ok(())
    }

    fn put_many(&self, entities: &[(Key, Entity)]) -> Result<()> {
        for chunk in entities.chunks(BATCH_WRITE_LIMIT) {
            let requests = chunk
                .iter()
                .map(|(key, entity)| {
                    aws_sdk_dynamodb::types::WriteRequest::builder()
                        .put_request(
                            aws_sdk_dynamodb::types::PutRequest::builder()
                                .set_item(Some(Self::entity_to_item(key, entity)))
                                .build()
                                .expect("put request always has an item"),
                        )
                        .build()
                })
                .collect::<Vec<_>>();
            self.send_batch_write(requests)?;
        }
        Ok(())
    }

    fn delete(&self, key: &Key) -> Result<()> {
        RT.block_on(
            self.client
                .delete_item()
                .table_name(&self.table)
                .key(PK_ATTR, AttributeValue::S(key.to_string()))
                .send(),
        )
        .map_err(|e| wrap_io_err("DynamoDB DeleteItem", e))?;
        Ok(())
    }

    fn delete_many(&self, keys: &[Key]) -> Result<()> {
        for chunk in keys.chunks(BATCH_WRITE_LIMIT) {
            let requests = chunk
                .iter()
                .map(|key| {
                    aws_sdk_dynamodb::types::WriteRequest::builder()
                        .delete_request(
                            aws_sdk_dynamodb::types::DeleteRequest::builder()
                                .key(HashMap::from([(
                                    PK_ATTR.to_string(),
                                    AttributeValue::S(key.to_string()),
                                )]))
                                .build()
                                .expect("delete request always has a key"),
                        )
                        .build()
                })
                .collect::<Vec<_>>();
            self.send_batch_write(requests)?;
        }
        Ok(())
    }

    fn begin_tx(&self) -> Result<Box<dyn Tx>> {
        Ok(Box::new(DynamoDbTx {
            client: self.client.clone(),
            table: self.table.clone(),
            items: Vec::new(),
        }))
    }
}

/// Stages `TransactWriteItem`s and commits them in one
/// `TransactWriteItems` call (AWS's own all-or-nothing batch
/// primitive), chunked at `TRANSACT_WRITE_LIMIT` if the flush batch is
/// larger — each chunk then commits independently, so atomicity is
/// only guaranteed within a chunk, not across the whole flush. This
/// mirrors spec.md §4.8: a mid-flush failure leaves later blocks'
/// dirty flags set for the next flush to retry.
struct DynamoDbTx {
    client: Client,
    table: String,
    items: Vec<TransactWriteItem>,
}

impl Tx for DynamoDbTx {
    fn put(&mut self, key: &Key, entity: Entity) -> Result<()> {
        let put = Put::builder()
            .table_name(&self.table)
            .set_item(Some(DynamoDbBackend::entity_to_item(key, &entity)))
            .build()
            .map_err(|e| wrap_io_err("DynamoDB transactional Put", e))?;
        self.items
            .push(TransactWriteItem::builder().put(put).build());
        Ok(())
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        let delete = Delete::builder()
            .table_name(&self.table)
            .key(PK_ATTR, AttributeValue::S(key.to_string()))
            .build()
            .map_err(|e| wrap_io_err("DynamoDB transactional Delete", e))?;
        self.items
            .push(TransactWriteItem::builder().delete(delete).build());
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        for chunk in self.items.chunks(TRANSACT_WRITE_LIMIT) {
            RT.block_on(
                self.client
                    .transact_write_items()
                    .set_transact_items(Some(chunk.to_vec()))
                    .send(),
            )
            .map_err(|e| wrap_io_err("DynamoDB TransactWriteItems", e))?;
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        // Nothing was sent yet — staged items are simply dropped.
        Ok(())
    }
}
