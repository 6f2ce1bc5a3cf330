use std::{process, sync::Arc};

use clap::Parser;
use serde::Serialize;
use taxfaq::{
    application::{
        error::AppError,
        faqs::{FAQ_NAMESPACE, FaqService, faq_keys},
        testimonials::{
            TESTIMONIAL_NAMESPACE, TestimonialService, TestimonialStats, testimonial_keys,
        },
    },
    cache::{
        Cache, CacheConfig, CacheManager, CachedRepository, InvalidationConfig, MemoryCache, Stats,
    },
    config::{self, CliArgs, Command, Settings},
    domain::{faq::Faq, testimonial::Testimonial},
    infra::{
        db::{self, PostgresStore},
        redis::RedisCache,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let cli_args = CliArgs::parse();
    let settings = config::load(&cli_args)?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Warmup => run_warmup(&settings).await,
        Command::Stats => run_stats(&settings).await,
        Command::ClearCache => run_clear_cache(&settings).await,
        Command::Migrate => run_migrate(&settings).await,
    }
}

struct Runtime {
    faqs: FaqService,
    testimonials: TestimonialService,
}

async fn build_runtime(settings: &Settings) -> Result<Runtime, AppError> {
    let config = Arc::new(CacheConfig::from(&settings.cache));
    let invalidation = InvalidationConfig::from(&settings.invalidation);

    let (faq_cache, testimonial_cache): (Arc<dyn Cache>, Arc<dyn Cache>) = match &settings.redis
    {
        Some(redis) => {
            let conn = RedisCache::connect(redis).await?;
            (
                Arc::new(RedisCache::new(
                    conn.clone(),
                    Arc::clone(&config),
                    redis,
                    FAQ_NAMESPACE,
                )),
                Arc::new(RedisCache::new(
                    conn,
                    Arc::clone(&config),
                    redis,
                    TESTIMONIAL_NAMESPACE,
                )),
            )
        }
        None => {
            warn!("redis.url is not set; using the in-process cache");
            (
                Arc::new(MemoryCache::new(Arc::clone(&config), FAQ_NAMESPACE)),
                Arc::new(MemoryCache::new(Arc::clone(&config), TESTIMONIAL_NAMESPACE)),
            )
        }
    };

    let pool = db::connect(&settings.database).await?;
    let faq_manager = CacheManager::new(faq_cache, faq_keys(), Arc::clone(&config), &invalidation);
    let faq_repo = CachedRepository::new(
        Arc::new(PostgresStore::<Faq>::new(pool.clone())),
        faq_manager.clone(),
    );
    let testimonial_manager =
        CacheManager::new(testimonial_cache, testimonial_keys(), config, &invalidation);
    let testimonial_repo = CachedRepository::new(
        Arc::new(PostgresStore::<Testimonial>::new(pool)),
        testimonial_manager.clone(),
    );

    info!(
        mode = %invalidation.mode,
        enabled = settings.cache.enabled,
        "Cache runtime ready"
    );

    Ok(Runtime {
        faqs: FaqService::new(Arc::new(faq_repo), faq_manager),
        testimonials: TestimonialService::new(Arc::new(testimonial_repo), testimonial_manager),
    })
}

async fn run_warmup(settings: &Settings) -> Result<(), AppError> {
    let runtime = build_runtime(settings).await?;
    let report = runtime.faqs.warm_up().await?;
    print_json(&report)
}

#[derive(Serialize)]
struct StatsReport {
    namespace: &'static str,
    hit_rate: f64,
    #[serde(flatten)]
    stats: Stats,
}

#[derive(Serialize)]
struct StatsOutput {
    cache: [StatsReport; 2],
    testimonials: TestimonialStats,
}

async fn run_stats(settings: &Settings) -> Result<(), AppError> {
    let runtime = build_runtime(settings).await?;
    if settings.cache.warmup_on_start {
        runtime.faqs.warm_up().await?;
    }
    let testimonials = runtime.testimonials.stats().await?;
    let cache = [
        (FAQ_NAMESPACE, runtime.faqs.cache().stats()),
        (TESTIMONIAL_NAMESPACE, runtime.testimonials.cache().stats()),
    ]
    .map(|(namespace, stats)| StatsReport {
        namespace,
        hit_rate: stats.hit_rate(),
        stats,
    });
    print_json(&StatsOutput {
        cache,
        testimonials,
    })
}

async fn run_clear_cache(settings: &Settings) -> Result<(), AppError> {
    let runtime = build_runtime(settings).await?;
    runtime.faqs.cache().invalidate_all().await?;
    runtime.testimonials.cache().invalidate_all().await?;
    info!(
        namespaces = ?[FAQ_NAMESPACE, TESTIMONIAL_NAMESPACE],
        "Cache cleared"
    );
    Ok(())
}

async fn run_migrate(settings: &Settings) -> Result<(), AppError> {
    let pool = db::connect(&settings.database).await?;
    db::run_migrations(&pool).await?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
