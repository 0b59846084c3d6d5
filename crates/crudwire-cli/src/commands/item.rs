//! Item command handlers

use anyhow::{bail, Result};

use crudwire_core::{ActionKind, Config, Domain, Item, Payload, Session, Verb};

use super::{new_records, perform, resolve_id};
use crate::output::Output;
use crate::prompt::confirm;

fn action(verb: Verb) -> ActionKind {
    ActionKind::new(Domain::Item, verb)
}

/// Create an item and show the row the server assigned
pub async fn add(
    session: &Session,
    config: &Config,
    name: String,
    quantity: u64,
    price: f64,
    output: &Output,
) -> Result<()> {
    let before = session.synchronizer().view().items;
    let item = Item::new(name, quantity, price);

    perform(session, config, action(Verb::Create), Payload::Items(vec![item])).await?;

    let created = new_records(&before, &session.synchronizer().view().items);
    match created.as_slice() {
        [item] => output.success(&format!("Created item: {}", item.item_id)),
        _ => output.success("Item created"),
    }
    output.print_items(&created);
    Ok(())
}

/// List all items
pub fn list(session: &Session, output: &Output) -> Result<()> {
    output.print_items(&session.synchronizer().view().items);
    Ok(())
}

/// Change fields of an item
pub async fn update(
    session: &Session,
    config: &Config,
    id: String,
    name: Option<String>,
    quantity: Option<u64>,
    price: Option<f64>,
    output: &Output,
) -> Result<()> {
    if name.is_none() && quantity.is_none() && price.is_none() {
        bail!("Nothing to update. Pass --name, --quantity and/or --price.");
    }

    let view = session.synchronizer().view();
    let id = resolve_id("item", &id, &view.items)?;
    let mut item = view
        .item(&id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Item not found: {}", id))?;

    if let Some(name) = name {
        item.name = name;
    }
    if let Some(quantity) = quantity {
        item.quantity = quantity;
    }
    if let Some(price) = price {
        item.price = price;
    }

    perform(session, config, action(Verb::Update), Payload::Items(vec![item])).await?;

    output.success(&format!("Updated item: {}", id));
    if let Some(updated) = session.synchronizer().view().item(&id) {
        output.print_items(std::slice::from_ref(updated));
    }
    Ok(())
}

/// Delete items by id or prefix
pub async fn delete(
    session: &Session,
    config: &Config,
    ids: Vec<String>,
    output: &Output,
) -> Result<()> {
    let items = session.synchronizer().view().items;
    let ids = ids
        .iter()
        .map(|id| resolve_id("item", id, &items))
        .collect::<Result<Vec<_>>>()?;

    if output.should_prompt() {
        for id in &ids {
            if let Some(item) = items.iter().find(|i| &i.item_id == id) {
                println!("Delete item: {} - {}", id, item.name);
            }
        }
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let count = ids.len();
    perform(session, config, action(Verb::Delete), Payload::Ids(ids)).await?;

    output.success(&format!("Deleted {} item(s)", count));
    Ok(())
}

/// Delete every item
pub async fn delete_all(session: &Session, config: &Config, yes: bool, output: &Output) -> Result<()> {
    let count = session.synchronizer().view().items.len();

    if !yes && output.should_prompt() {
        println!("This deletes all {} item(s) for every connected client.", count);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    perform(session, config, action(Verb::DeleteAll), Payload::Empty).await?;

    output.success("Deleted all items");
    Ok(())
}
