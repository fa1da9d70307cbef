//! Command execution.
//!
//! Every command writes its report to the given writer and nothing else;
//! diagnostics go through `tracing`.

use std::io::Write;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tally_core::{format_real, CountMode, OperationName, StoredValue, TallyConfig};
use tally_docs::{
    display_id, insert_school, list_all, log_stats, schools_by_topic, top_students, update_topics,
    Bson, Document,
};
use tally_store::{Cache, Retrieved};
use tally_web::CachedPageFetcher;
use tracing::debug;

use crate::backends::{Backends, CollectionRole};
use crate::cli::{Command, ReadAs, SchoolsCommand, ValueKind};

/// Run `command` against `backends`, writing its output to `out`.
pub async fn run(
    command: &Command,
    config: &TallyConfig,
    backends: &dyn Backends,
    out: &mut dyn Write,
) -> Result<()> {
    debug!(?command, "Running command");
    match command {
        Command::Store { value, kind } => {
            let value = parse_value(value, *kind)?;
            let cache = open_cache(config, backends).await?;
            let key = cache.store(value).await?;
            writeln!(out, "{}", key)?;
        }
        Command::Get { key, read_as } => {
            let cache = open_cache(config, backends).await?;
            match read_value(&cache, key, *read_as).await? {
                Some(rendered) => writeln!(out, "{}", rendered)?,
                None => writeln!(out, "(nil)")?,
            }
        }
        Command::Replay { operation } => {
            let cache = open_cache(config, backends).await?;
            let report = cache.replay(&OperationName::new(operation.as_str())).await?;
            write!(out, "{}", report)?;
        }
        Command::Demo => {
            let store = backends.store().await?;
            let cache = Cache::fresh(store).await?.with_failure_policy(config.failure_policy);
            cache.store("foo").await?;
            cache.store("bar").await?;
            cache.store(42i64).await?;
            let report = cache.replay(&Cache::store_operation()).await?;
            write!(out, "{}", report)?;
        }
        Command::Fetch { url, ttl_secs } => {
            let ttl = ttl_secs.map(Duration::from_secs).unwrap_or_else(|| config.page_ttl());
            let fetcher =
                CachedPageFetcher::new(backends.store().await?, backends.fetcher()?).with_ttl(ttl)?;
            let body = fetcher.get_page(url).await?;
            write!(out, "{}", body)?;
            if !body.ends_with('\n') {
                writeln!(out)?;
            }
        }
        Command::Schools { command } => run_schools(command, backends, out).await?,
        Command::TopStudents => {
            let students = backends.collection(CollectionRole::Students).await?;
            for student in top_students(students.as_ref()).await? {
                let average = student
                    .average_score
                    .map(format_real)
                    .unwrap_or_else(|| "None".to_string());
                writeln!(out, "[{}] {} => {}", display_id(&student.id), student.name, average)?;
            }
        }
        Command::LogStats { estimated, no_ips } => {
            let mode = if *estimated { CountMode::Estimated } else { config.count_mode };
            let logs = backends.collection(CollectionRole::Logs).await?;
            let stats = log_stats(logs.as_ref(), mode, !*no_ips).await?;
            write!(out, "{}", stats)?;
        }
    }
    Ok(())
}

async fn run_schools(
    command: &SchoolsCommand,
    backends: &dyn Backends,
    out: &mut dyn Write,
) -> Result<()> {
    let schools = backends.collection(CollectionRole::Schools).await?;
    match command {
        SchoolsCommand::List => {
            for school in list_all(schools.as_ref()).await? {
                writeln!(out, "{}", school_line(&school))?;
            }
        }
        SchoolsCommand::Insert { fields } => {
            let mut document = Document::new();
            for (field, value) in fields {
                document.insert(field.as_str(), value.as_str());
            }
            let id = insert_school(schools.as_ref(), document).await?;
            writeln!(out, "New school created: {}", display_id(&id))?;
        }
        SchoolsCommand::UpdateTopics { name, topics } => {
            let summary = update_topics(schools.as_ref(), name, topics).await?;
            writeln!(out, "Updated {} school(s)", summary.matched)?;
        }
        SchoolsCommand::ByTopic { topic } => {
            for school in schools_by_topic(schools.as_ref(), topic).await? {
                writeln!(out, "{}", school_line(&school))?;
            }
        }
    }
    Ok(())
}

async fn open_cache(config: &TallyConfig, backends: &dyn Backends) -> Result<Cache> {
    Ok(Cache::open(backends.store().await?).with_failure_policy(config.failure_policy))
}

fn parse_value(value: &str, kind: ValueKind) -> Result<StoredValue> {
    Ok(match kind {
        ValueKind::Text => StoredValue::from(value),
        ValueKind::Bytes => StoredValue::from(value.as_bytes()),
        ValueKind::Int => StoredValue::Integer(
            value
                .parse()
                .wrap_err_with(|| format!("'{}' is not an integer", value))?,
        ),
        ValueKind::Real => StoredValue::Real(
            value
                .parse()
                .wrap_err_with(|| format!("'{}' is not a real number", value))?,
        ),
    })
}

async fn read_value(cache: &Cache, key: &str, read_as: ReadAs) -> Result<Option<String>> {
    let rendered = match read_as {
        ReadAs::Text => cache.retrieve_as_text(key).await?,
        ReadAs::Int => cache.retrieve_as_integer(key).await?.map(|n| n.to_string()),
        ReadAs::Real => cache.retrieve_as_real(key).await?.map(format_real),
        ReadAs::Raw => cache
            .retrieve::<Vec<u8>>(key, None)
            .await?
            .and_then(Retrieved::raw)
            .map(|raw| StoredValue::Bytes(raw).literal()),
    };
    Ok(rendered)
}

fn school_line(school: &Document) -> String {
    let id = school.get("_id").map(display_id).unwrap_or_default();
    let name = school.get_str("name").unwrap_or("");
    let topics = match school.get("topics") {
        Some(Bson::Array(topics)) => topics.iter().map(display_id).collect::<Vec<_>>().join(", "),
        Some(other) => display_id(other),
        None => String::new(),
    };
    format!("[{}] {} [{}]", id, name, topics)
}
