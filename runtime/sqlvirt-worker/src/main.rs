//! Executes one statement through the stub virtualization layer.
//!
//! The statement goes to the stub service first; on a miss it runs against
//! the sqlite database given with `--db` (or fails, with `--mock`).
//! Defaults come from `SQLVIRT_STUB_URL`, `SQLVIRT_RECORD_DIR` and
//! `SQLVIRT_TYPED_RECORDING`.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use sqlvirt_db::{
    Connection, DataSource, Execution, RowSet, RowSetCodec, ServiceVirtualizer, SqliteDataSource,
    SqliteOpenMode, Statement, Value, VirtualizationConfig,
};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: sqlvirt --db PATH [--stub-url URL] [--record DIR] [--typed] [--mock] \
[--param N=VALUE]... [--null N] [--add-batch] [--query|--update|--batch] SQL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Execute,
    Query,
    Update,
    Batch,
}

#[derive(Debug)]
struct Options {
    db: Option<PathBuf>,
    config: VirtualizationConfig,
    mock: bool,
    params: Vec<(usize, Value)>,
    add_batch: bool,
    mode: Mode,
    sql: String,
}

fn parse_position(raw: &str) -> Result<usize, String> {
    raw.parse::<usize>()
        .map_err(|_| format!("invalid parameter position '{raw}'"))
}

fn parse_args<I>(args: I, mut config: VirtualizationConfig) -> Result<Options, String>
where
    I: IntoIterator<Item = String>,
{
    let mut db = None;
    let mut mock = false;
    let mut params = Vec::new();
    let mut add_batch = false;
    let mut mode = Mode::Execute;
    let mut sql = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--db" => db = args.next().map(PathBuf::from),
            "--stub-url" => {
                let url = args.next().ok_or("--stub-url needs a value")?;
                let record_dir = config.record_dir.take();
                let typed = config.typed_recording;
                config = VirtualizationConfig::new(url).with_typed_recording(typed);
                config.record_dir = record_dir;
            }
            "--record" => {
                let dir = args.next().ok_or("--record needs a directory")?;
                config = config.with_record_dir(dir);
            }
            "--typed" => config = config.with_typed_recording(true),
            "--mock" => mock = true,
            "--param" => {
                let pair = args.next().ok_or("--param needs N=VALUE")?;
                let (position, value) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("expected N=VALUE, got '{pair}'"))?;
                params.push((parse_position(position)?, Value::from(value)));
            }
            "--null" => {
                let position = args.next().ok_or("--null needs a position")?;
                params.push((parse_position(&position)?, Value::Null));
            }
            "--add-batch" => add_batch = true,
            "--query" => mode = Mode::Query,
            "--update" => mode = Mode::Update,
            "--batch" => mode = Mode::Batch,
            other if other.starts_with("--") => return Err(format!("unknown option {other}")),
            _ => {
                if sql.replace(arg).is_some() {
                    return Err("more than one SQL statement given".to_string());
                }
            }
        }
    }
    let sql = sql.ok_or("missing SQL statement")?;
    if db.is_none() && !mock {
        return Err("--db is required unless --mock is given".to_string());
    }
    Ok(Options {
        db,
        config,
        mock,
        params,
        add_batch,
        mode,
        sql,
    })
}

fn render_rows(codec: &RowSetCodec, mut rows: RowSet) -> sqlvirt_db::Result<String> {
    codec.encode(&mut rows)
}

fn execute<C: Connection>(
    connection: &C,
    options: &Options,
    codec: &RowSetCodec,
) -> sqlvirt_db::Result<String> {
    let mut statement = connection.prepare(&options.sql)?;
    for (position, value) in &options.params {
        statement.bind(*position, value.clone())?;
    }
    if options.add_batch {
        statement.add_batch()?;
    }
    match options.mode {
        Mode::Query => render_rows(codec, statement.execute_query()?),
        Mode::Update => Ok(statement.execute_update()?.to_string()),
        Mode::Batch => {
            let counts = statement.execute_batch()?;
            Ok(counts
                .iter()
                .map(i32::to_string)
                .collect::<Vec<_>>()
                .join(","))
        }
        Mode::Execute => match statement.execute()? {
            Execution::Rows(rows) => render_rows(codec, rows),
            Execution::UpdateCount(count) => Ok(count.to_string()),
        },
    }
}

fn run(options: &Options) -> sqlvirt_db::Result<String> {
    let virtualizer = ServiceVirtualizer::from_config(&options.config);
    let codec = RowSetCodec::default().typed(options.config.typed_recording);
    tracing::debug!(
        stub = virtualizer.dispatcher().endpoint(),
        recording = options.config.record_dir.is_some(),
        "virtualizer ready"
    );
    match (&options.db, options.mock) {
        (Some(db), false) => {
            let source =
                virtualizer.spy_on(SqliteDataSource::new(db, 1, SqliteOpenMode::ReadWrite));
            let connection = source.connect()?;
            execute(&connection, options, &codec)
        }
        _ => {
            let connection = virtualizer.mock_data_source().connect()?;
            execute(&connection, options, &codec)
        }
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = match parse_args(env::args().skip(1), VirtualizationConfig::from_env()) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}\n{USAGE}");
            return ExitCode::from(1);
        }
    };
    match run(&options) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            if err.is_fatal() {
                eprintln!("sqlvirt: {err}");
            } else {
                eprintln!("sqlvirt: database error: {err}");
            }
            ExitCode::from(1)
        }
    }
}
