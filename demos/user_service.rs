//! User directory served over both transports
//!
//! Unary:
//!   curl -X POST localhost:8080/kv/addUser -d '{"id":1,"params":["\"Alice\"","30"]}'
//!   curl 'localhost:8080/kv/countUsers?id=2'
//!   curl -X POST localhost:8080/kv/listUsers -d '{"id":3,"params":["1","10",null,null]}'
//!
//! Duplex: connect a WebSocket client to ws://localhost:8080/kvws/chat and
//! send frames like {"id":0,"params":["\"hello\""]}.

use kvrpc::core::{Error, PagedResult, SelectOption, SortDirection, Sorter};
use kvrpc::{CallContext, KvServer, Route, ServiceManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    name: String,
    age: u32,
}

#[derive(Default)]
struct Directory {
    users: RwLock<Vec<User>>,
}

impl Directory {
    async fn add(&self, name: String, age: u32) -> Result<User, Error> {
        if name.trim().is_empty() {
            return Err(Error::service("Name must not be empty"));
        }
        let user = User { name, age };
        self.users.write().await.push(user.clone());
        Ok(user)
    }

    async fn page(&self, page: Option<u32>, size: Option<u32>, sorters: Vec<Sorter>) -> PagedResult<User> {
        let mut rows = self.users.read().await.clone();
        for sorter in sorters.iter().rev() {
            match (sorter.field.as_str(), sorter.dir) {
                ("age", SortDirection::Asc) => rows.sort_by_key(|u| u.age),
                ("age", SortDirection::Desc) => rows.sort_by_key(|u| std::cmp::Reverse(u.age)),
                ("name", SortDirection::Asc) => rows.sort_by(|a, b| a.name.cmp(&b.name)),
                ("name", SortDirection::Desc) => rows.sort_by(|a, b| b.name.cmp(&a.name)),
                _ => {}
            }
        }
        PagedResult::paginate(rows, page, size)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let directory = Arc::new(Directory::default());

    let mut users = ServiceManager::new("Directory", move |_: &CallContext| {
        Ok(Arc::clone(&directory))
    });
    users.bind2("addUser", |dir: Arc<Directory>, name: String, age: u32| async move {
        dir.add(name, age).await
    });
    users.bind0(Route::get("countUsers"), |dir: Arc<Directory>| async move {
        Ok(dir.users.read().await.len())
    });
    users.bind_paged(
        "listUsers",
        |dir: Arc<Directory>, page: Option<u32>, size: Option<u32>, _filters, sorters: Option<Vec<Sorter>>| async move {
            Ok(dir.page(page, size, sorters.unwrap_or_default()).await)
        },
    );
    users.bind_options(
        "userOptions",
        |dir: Arc<Directory>, search: Option<String>, _initial: Option<String>| async move {
            let search = search.unwrap_or_default().to_lowercase();
            Ok(dir
                .users
                .read()
                .await
                .iter()
                .filter(|u| u.name.to_lowercase().contains(&search))
                .map(|u| SelectOption::new(u.name.clone(), format!("{} ({})", u.name, u.age)))
                .collect::<Vec<_>>())
        },
    );
    users.bind_channel(
        "chat",
        |_dir: Arc<Directory>, mut incoming: UnboundedReceiver<String>, outgoing: UnboundedSender<String>| async move {
            while let Some(text) = incoming.recv().await {
                if outgoing.send(format!("echo:{text}")).is_err() {
                    break;
                }
            }
            Ok(())
        },
    );

    let server = KvServer::builder()
        .bind_str("127.0.0.1:8080")?
        .service(users)
        .max_in_flight(256)
        .admission_timeout(Duration::from_secs(5))
        .with_default_observability()
        .service_name("user-directory")
        .build()
        .await?;

    println!("Listening on http://{}", server.local_addr()?);

    // greet every open chat session once a minute
    let sessions = server.sessions();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            for key in sessions.keys().await {
                let _ = sessions.send_value(&key, "server says hi").await;
            }
        }
    });

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    kvrpc::core::shutdown_observability();
    Ok(())
}
