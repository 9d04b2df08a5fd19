mod common;

use std::sync::Arc;

use pipelink_message::{
    shared, Fields, Graph, GraphNode, GraphReader, GraphWriter, Result, Shared, WeakShared,
};
use pipelink_peer::ClientConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use common::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
enum Kind {
    #[default]
    Alpha,
    Beta,
    Gamma,
}

#[derive(Default)]
struct Collection {
    items: Vec<Shared<Item>>,
}

#[derive(Default)]
struct Item {
    id: i32,
    kind: Kind,
    parent: WeakShared<Collection>,
}

impl GraphNode for Collection {
    fn write_fields(&self, writer: &mut GraphWriter, fields: &mut Fields) -> Result<()> {
        fields.insert("items".into(), writer.write_nodes(&self.items)?);
        Ok(())
    }

    fn read_fields(&mut self, fields: &Fields, reader: &mut GraphReader) -> Result<()> {
        let items = reader.field(fields, "items")?;
        self.items = reader.read_nodes(items)?;
        Ok(())
    }
}

impl GraphNode for Item {
    fn write_fields(&self, writer: &mut GraphWriter, fields: &mut Fields) -> Result<()> {
        fields.insert("id".into(), writer.write_value(&self.id)?);
        fields.insert("kind".into(), writer.write_value(&self.kind)?);
        fields.insert("parent".into(), writer.write_weak(&self.parent)?);
        Ok(())
    }

    fn read_fields(&mut self, fields: &Fields, reader: &mut GraphReader) -> Result<()> {
        let id = reader.field(fields, "id")?;
        let kind = reader.field(fields, "kind")?;
        let parent = reader.field(fields, "parent")?;
        self.id = reader.read_value(id)?;
        self.kind = reader.read_value(kind)?;
        self.parent = reader.read_weak(parent)?;
        Ok(())
    }
}

fn build(count: i32) -> Shared<Collection> {
    let kinds = [Kind::Alpha, Kind::Beta, Kind::Gamma];
    let root = shared(Collection::default());
    let items = (0..count)
        .map(|id| {
            shared(Item {
                id,
                kind: kinds[id as usize % kinds.len()],
                parent: Arc::downgrade(&root),
            })
        })
        .collect();
    root.write().unwrap().items = items;
    root
}

fn content_hash(root: &Shared<Collection>) -> String {
    let root = root.read().unwrap();
    let joined = root
        .items
        .iter()
        .map(|item| {
            let item = item.read().unwrap();
            ((item.id as i64 * 397) ^ item.kind as i64).to_string()
        })
        .collect::<Vec<_>>()
        .join("");
    format!("{:x}", Sha256::digest(joined.as_bytes()))
}

#[test]
fn cyclic_graph_survives_the_wire() {
    let endpoint = temp_endpoint("graph");
    let (_server, server_events) = start_server::<Graph<Collection>>(&endpoint);
    let (client, _client_events, _id) =
        connect_client::<Graph<Collection>>(&endpoint, ClientConfig::default());
    expect_connected(&server_events);

    let original = build(1000);
    let expected = content_hash(&original);
    client.send(&Graph(Arc::clone(&original))).unwrap();

    let (_, received) = expect_client_message(&server_events);
    let root = received.into_root();
    assert_eq!(content_hash(&root), expected);

    let collection = root.read().unwrap();
    assert_eq!(collection.items.len(), 1000);
    for item in &collection.items {
        let parent = item
            .read()
            .unwrap()
            .parent
            .upgrade()
            .expect("back-reference should resolve");
        assert!(Arc::ptr_eq(&parent, &root), "each item must point at the one restored parent");
    }
}

#[test]
fn server_can_send_graphs_back() {
    let endpoint = temp_endpoint("graph-back");
    let (server, server_events) = start_server::<Graph<Collection>>(&endpoint);
    let (_client, client_events, id) =
        connect_client::<Graph<Collection>>(&endpoint, ClientConfig::default());
    expect_connected(&server_events);

    let original = build(3);
    server.send(&id, &Graph(Arc::clone(&original))).unwrap();
    let restored = expect_server_message(&client_events).into_root();
    assert_eq!(content_hash(&restored), content_hash(&original));
}
