//! Demo commands served by the `bridgekit` binary: an in-memory item list,
//! a user directory, a weather forecast, a category tree and a streaming
//! ticker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::bridge_model;
use crate::channel::ChannelSender;
use crate::error::BridgeError;
use crate::registry::{CommandBuilder, NoParams, Registry};

const MODULE: &str = module_path!();

// ── Models ───────────────────────────────────────────────────────

bridge_model! {
    /// An entry in the shopping list.
    pub struct Item {
        pub id: u64,
        pub name: String,
    }
}

bridge_model! {
    /// A registered user.
    pub struct User {
        pub user_id: u64,
        pub display_name: String,
        /// Absent for users who signed up without one.
        pub email: Option<String>,
        pub roles: Vec<String>,
    }
}

bridge_model! {
    pub struct DayForecast {
        /// Days from today, starting at 0.
        pub day: u32,
        pub high_c: f64,
        pub low_c: f64,
        pub conditions: String,
    }
}

bridge_model! {
    /// Multi-day forecast for one city.
    pub struct Forecast {
        pub city: String,
        pub days: Vec<DayForecast>,
    }
}

bridge_model! {
    /// A node in the product category tree.
    pub struct Category {
        pub name: String,
        pub children: Vec<Category>,
    }
}

// ── Params ───────────────────────────────────────────────────────

bridge_model! {
    pub struct AddItemParams {
        pub name: String,
    }
}

bridge_model! {
    pub struct ItemIdParams {
        pub id: u64,
    }
}

bridge_model! {
    pub struct UserIdParams {
        pub user_id: u64,
    }
}

bridge_model! {
    pub struct ForecastParams {
        pub city: String,
        /// Number of days, 1 to 7. Defaults to 3.
        pub days: Option<u32>,
    }
}

bridge_model! {
    pub struct DivideParams {
        pub dividend: f64,
        pub divisor: f64,
    }
}

bridge_model! {
    pub struct TickParams {
        pub count: u32,
        /// Delay between ticks. Defaults to 100 ms.
        pub interval_ms: Option<u64>,
    }
}

// ── Store ────────────────────────────────────────────────────────

/// In-memory item list shared by the item commands.
#[derive(Debug, Default)]
pub struct ItemStore {
    items: Mutex<IndexMap<u64, Item>>,
    next_id: AtomicU64,
}

impl ItemStore {
    pub fn add(&self, name: String) -> Result<Item, String> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err("Item name must not be empty".to_string());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let item = Item { id, name };
        self.items.lock().insert(id, item.clone());
        Ok(item)
    }

    pub fn list(&self) -> Vec<Item> {
        self.items.lock().values().cloned().collect()
    }

    pub fn remove(&self, id: u64) -> bool {
        self.items.lock().shift_remove(&id).is_some()
    }
}

fn users() -> Vec<User> {
    vec![
        User {
            user_id: 1,
            display_name: "Ada".to_string(),
            email: Some("ada@example.com".to_string()),
            roles: vec!["admin".to_string()],
        },
        User {
            user_id: 2,
            display_name: "Linus".to_string(),
            email: None,
            roles: Vec::new(),
        },
    ]
}

fn forecast(city: &str, days: u32) -> Forecast {
    const CONDITIONS: [&str; 4] = ["sunny", "cloudy", "rain", "windy"];
    // Deterministic per city so repeated calls agree.
    let seed = city.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    let days = (0..days)
        .map(|day| {
            let mix = seed.wrapping_add(day.wrapping_mul(7));
            let base = f64::from(mix % 15) + 10.0;
            DayForecast {
                day,
                high_c: base + 6.0,
                low_c: base,
                conditions: CONDITIONS
                    .get((mix % 4) as usize)
                    .copied()
                    .unwrap_or("sunny")
                    .to_string(),
            }
        })
        .collect();
    Forecast {
        city: city.to_string(),
        days,
    }
}

fn categories() -> Vec<Category> {
    let leaf = |name: &str| Category {
        name: name.to_string(),
        children: Vec::new(),
    };
    vec![
        Category {
            name: "Produce".to_string(),
            children: vec![leaf("Fruit"), leaf("Vegetables")],
        },
        Category {
            name: "Dairy".to_string(),
            children: vec![leaf("Milk"), leaf("Cheese")],
        },
    ]
}

// ── Registration ─────────────────────────────────────────────────

/// Register every demo command.
pub fn register(registry: &mut Registry) -> Result<(), BridgeError> {
    let store = Arc::new(ItemStore::default());

    let s = Arc::clone(&store);
    registry.register(
        CommandBuilder::new("add_item", MODULE)
            .doc("Add an item to the shopping list.")
            .params::<AddItemParams>()
            .handler(move |p: AddItemParams| {
                let store = Arc::clone(&s);
                async move { store.add(p.name) }
            }),
    )?;

    let s = Arc::clone(&store);
    registry.register(
        CommandBuilder::new("list_items", MODULE)
            .doc("List every item, oldest first.")
            .handler(move |_: NoParams| {
                let store = Arc::clone(&s);
                async move { Ok::<_, BridgeError>(store.list()) }
            }),
    )?;

    let s = Arc::clone(&store);
    registry.register(
        CommandBuilder::new("remove_item", MODULE)
            .doc("Remove an item. Returns whether it existed.")
            .params::<ItemIdParams>()
            .handler(move |p: ItemIdParams| {
                let store = Arc::clone(&s);
                async move { Ok::<_, BridgeError>(store.remove(p.id)) }
            }),
    )?;

    registry.register(
        CommandBuilder::new("get_user", MODULE)
            .doc("Look up a user by id.")
            .params::<UserIdParams>()
            .handler(|p: UserIdParams| async move {
                users()
                    .into_iter()
                    .find(|u| u.user_id == p.user_id)
                    .ok_or_else(|| format!("No user with id {}", p.user_id))
            }),
    )?;

    registry.register(
        CommandBuilder::new("list_users", MODULE)
            .handler(|_: NoParams| async { Ok::<_, BridgeError>(users()) }),
    )?;

    registry.register(
        CommandBuilder::new("get_forecast", MODULE)
            .doc("Weather forecast for a city.")
            .params::<ForecastParams>()
            .handler(|p: ForecastParams| async move {
                let days = p.days.unwrap_or(3);
                if !(1..=7).contains(&days) {
                    return Err(format!("days must be between 1 and 7, got {days}"));
                }
                Ok(forecast(&p.city, days))
            }),
    )?;

    registry.register(
        CommandBuilder::new("get_categories", MODULE)
            .doc("The full category tree.")
            .handler(|_: NoParams| async { Ok::<_, BridgeError>(categories()) }),
    )?;

    registry.register(
        CommandBuilder::new("divide", MODULE)
            .params::<DivideParams>()
            .handler(|p: DivideParams| async move {
                if p.divisor == 0.0 {
                    return Err("Division by zero".to_string());
                }
                Ok(p.dividend / p.divisor)
            }),
    )?;

    registry.register(
        CommandBuilder::new("tick", MODULE)
            .doc("Stream `count` increasing numbers, one per interval.")
            .params::<TickParams>()
            .stream(|p: TickParams, tx: ChannelSender<u32>| async move {
                let interval = Duration::from_millis(p.interval_ms.unwrap_or(100));
                for i in 0..p.count {
                    if !tx.send(i) {
                        tracing::debug!(channel = tx.channel_id(), "tick consumer went away");
                        break;
                    }
                    tokio::time::sleep(interval).await;
                }
                Ok::<_, BridgeError>(())
            }),
    )?;

    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        let mut registry = Registry::new();
        register(&mut registry).unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn items_round_trip_through_the_store() {
        let d = dispatcher();
        let first = d.invoke("add_item", json!({"name": "milk"})).await.unwrap();
        assert_eq!(first, json!({"id": 1, "name": "milk"}));
        d.invoke("add_item", json!({"name": "eggs"})).await.unwrap();
        let removed = d.invoke("remove_item", json!({"id": 1})).await.unwrap();
        assert_eq!(removed, json!(true));
        let items = d.invoke("list_items", json!({})).await.unwrap();
        assert_eq!(items, json!([{"id": 2, "name": "eggs"}]));
    }

    #[tokio::test]
    async fn blank_item_name_is_execution_error() {
        let d = dispatcher();
        let err = d.invoke("add_item", json!({"name": "  "})).await.unwrap_err();
        assert_eq!(err.code(), "COMMAND_EXECUTION_ERROR");
        assert_eq!(err.to_string(), "Item name must not be empty");
        assert!(ItemStore::default().add(String::new()).is_err());
    }

    #[tokio::test]
    async fn forecast_defaults_and_bounds() {
        let d = dispatcher();
        let result = d.invoke("get_forecast", json!({"city": "Oslo"})).await.unwrap();
        assert_eq!(result["days"].as_array().unwrap().len(), 3);
        let again = d.invoke("get_forecast", json!({"city": "Oslo"})).await.unwrap();
        assert_eq!(result, again);
        let err = d
            .invoke("get_forecast", json!({"city": "Oslo", "days": 9}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "COMMAND_EXECUTION_ERROR");
    }

    #[tokio::test]
    async fn divide_by_zero_fails() {
        let d = dispatcher();
        let ok = d.invoke("divide", json!({"dividend": 9, "divisor": 3})).await.unwrap();
        assert_eq!(ok.as_f64().unwrap(), 3.0);
        let err = d
            .invoke("divide", json!({"dividend": 1, "divisor": 0}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Division by zero");
    }

    #[tokio::test]
    async fn missing_user_is_execution_error() {
        let d = dispatcher();
        let user = d.invoke("get_user", json!({"user_id": 2})).await.unwrap();
        assert_eq!(user["email"], serde_json::Value::Null);
        let err = d.invoke("get_user", json!({"user_id": 99})).await.unwrap_err();
        assert_eq!(err.code(), "COMMAND_EXECUTION_ERROR");
    }

    #[test]
    fn registers_recursive_category_once() {
        let mut registry = Registry::new();
        register(&mut registry).unwrap();
        assert!(registry.models().contains("Category"));
        assert!(registry.models().contains("DayForecast"));
        assert!(!registry.models().contains("TickParams"));
        assert!(registry.get("tick").unwrap().is_stream());
    }
}
