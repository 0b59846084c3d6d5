//! Customer command handlers

use anyhow::{bail, Result};

use crudwire_core::{ActionKind, Config, Customer, Domain, Payload, Session, Verb};

use super::{new_records, perform, resolve_id};
use crate::output::Output;
use crate::prompt::confirm;

fn action(verb: Verb) -> ActionKind {
    ActionKind::new(Domain::Customer, verb)
}

/// Create a customer and show the row the server assigned
pub async fn add(
    session: &Session,
    config: &Config,
    name: String,
    email: String,
    output: &Output,
) -> Result<()> {
    let before = session.synchronizer().view().customers;
    let customer = Customer::new(name, email);

    perform(session, config, action(Verb::Create), Payload::Customers(vec![customer])).await?;

    let created = new_records(&before, &session.synchronizer().view().customers);
    match created.as_slice() {
        [customer] => output.success(&format!("Created customer: {}", customer.customer_id)),
        _ => output.success("Customer created"),
    }
    output.print_customers(&created);
    Ok(())
}

/// List all customers
pub fn list(session: &Session, output: &Output) -> Result<()> {
    output.print_customers(&session.synchronizer().view().customers);
    Ok(())
}

/// Change the name and/or email of a customer
pub async fn update(
    session: &Session,
    config: &Config,
    id: String,
    name: Option<String>,
    email: Option<String>,
    output: &Output,
) -> Result<()> {
    if name.is_none() && email.is_none() {
        bail!("Nothing to update. Pass --name and/or --email.");
    }

    let view = session.synchronizer().view();
    let id = resolve_id("customer", &id, &view.customers)?;
    let mut customer = view
        .customer(&id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Customer not found: {}", id))?;

    if let Some(name) = name {
        customer.name = name;
    }
    if let Some(email) = email {
        customer.email = email;
    }

    perform(session, config, action(Verb::Update), Payload::Customers(vec![customer])).await?;

    output.success(&format!("Updated customer: {}", id));
    if let Some(updated) = session.synchronizer().view().customer(&id) {
        output.print_customers(std::slice::from_ref(updated));
    }
    Ok(())
}

/// Delete customers by id or prefix
pub async fn delete(
    session: &Session,
    config: &Config,
    ids: Vec<String>,
    output: &Output,
) -> Result<()> {
    let customers = session.synchronizer().view().customers;
    let ids = ids
        .iter()
        .map(|id| resolve_id("customer", id, &customers))
        .collect::<Result<Vec<_>>>()?;

    if output.should_prompt() {
        for id in &ids {
            if let Some(customer) = customers.iter().find(|c| &c.customer_id == id) {
                println!("Delete customer: {} - {}", id, customer.name);
            }
        }
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let count = ids.len();
    perform(session, config, action(Verb::Delete), Payload::Ids(ids)).await?;

    output.success(&format!("Deleted {} customer(s)", count));
    Ok(())
}

/// Delete every customer
pub async fn delete_all(session: &Session, config: &Config, yes: bool, output: &Output) -> Result<()> {
    let count = session.synchronizer().view().customers.len();

    if !yes && output.should_prompt() {
        println!("This deletes all {} customer(s) for every connected client.", count);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    perform(session, config, action(Verb::DeleteAll), Payload::Empty).await?;

    output.success("Deleted all customers");
    Ok(())
}
