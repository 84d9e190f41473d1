//! 基本用法：注册、会话上下文、指标与依赖图
//!
//! 运行：`RUST_LOG=debug cargo run --example basic_container`

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use godare_di::prelude::*;

struct Logger {
    lines: AtomicU64,
}

impl Logger {
    fn log(&self, message: &str) {
        let n = self.lines.fetch_add(1, Ordering::Relaxed);
        println!("[{n:03}] {message}");
    }
}

struct UserRepository {
    logger: Arc<Logger>,
}

struct Cart {
    owner: String,
    repository: Arc<UserRepository>,
}

struct AppModule;

impl ContainerModule for AppModule {
    fn configure(&self, builder: ContainerBuilder) -> ContainerBuilder {
        builder
            .singleton("Logger", [] as [&str; 0], |_| {
                Ok(Logger {
                    lines: AtomicU64::new(0),
                })
            })
            .singleton("UserRepository", ["Logger"], |deps| {
                Ok(UserRepository {
                    logger: deps.get_at(0)?,
                })
            })
            .scoped("Cart", DependencyLifetime::Session, ["UserRepository"], |deps| {
                let repository: Arc<UserRepository> = deps.get_at(0)?;
                repository.logger.log("creating cart");
                Ok(Cart {
                    owner: format!("guest-{}", repository.logger.lines.load(Ordering::Relaxed)),
                    repository,
                })
            })
    }
}

fn main() -> Result<(), DIError> {
    godare_di::init_logging();
    println!(
        "GoDareDI {} (build {}, {})",
        godare_di::FRAMEWORK_VERSION,
        godare_di::BUILD_NUMBER,
        godare_di::version_number()
    );

    let container = ContainerBuilder::<ServiceKey>::new()
        .config(ContainerConfig::strict())
        .module(&AppModule)
        .build()?;
    container.initialize()?;

    let alice = container.begin_session()?;
    let bob = container.begin_session()?;
    let cart = ServiceKey::from("Cart");

    let a = container.resolve_as::<Cart>(&cart, &alice)?;
    let b = container.resolve_as::<Cart>(&cart, &bob)?;
    let a_again = container.resolve_as::<Cart>(&cart, &alice)?;
    println!("alice: {}, bob: {}", a.owner, b.owner);
    println!("alice cart reused: {}", Arc::ptr_eq(&a, &a_again));
    println!(
        "shared repository: {}",
        Arc::ptr_eq(&a.repository, &b.repository)
    );

    println!("dropped {} instances", container.end_context(&alice));

    let metrics = container.metrics();
    println!(
        "{} resolutions, hit rate {:.2}, avg {:?}, ~{} bytes",
        metrics.total_resolutions,
        metrics.cache_hit_rate,
        metrics.average_resolution_time,
        metrics.memory_usage
    );
    println!("{}", container.dependency_graph().to_mermaid());
    Ok(())
}
