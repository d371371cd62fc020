use anyhow::{anyhow, Context, Result};
use clap::Parser;
use plant_regions::{
    Check, CheckSet, FieldNames, OutputFormat, PartitionShape, Pipeline, PipelineConfig, TieBreak,
};
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 入力ディレクトリ（JSONエクスポートファイルまたはZIPファイル）
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// 出力ディレクトリ
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// 州境界のGeoJSON（ラベル属性 `name`）
    #[arg(long, value_name = "FILE")]
    states: Option<PathBuf>,

    /// 郡境界のGeoJSON（ラベル属性 `NAME_1`/`NAME_2`）
    #[arg(long, value_name = "FILE")]
    districts: Option<PathBuf>,

    /// 一致が必要なチェック数（2、3、4）
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(2..=4))]
    checks: u8,

    /// 有効にするチェックを個別指定（複数可、--checksより優先）
    #[arg(long = "check", value_name = "CHECK")]
    check: Vec<Check>,

    /// state, state-district, state-year or state-district-year
    #[arg(long, default_value = "state-district")]
    partition: PartitionShape,

    /// geojson or json
    #[arg(long, default_value = "geojson")]
    format: OutputFormat,

    /// first-match or require-unique
    #[arg(long, default_value = "first-match")]
    tie_break: TieBreak,

    /// 組み込みコード表を置き換えるJSONファイル
    #[arg(long, value_name = "FILE")]
    code_tables: Option<PathBuf>,

    #[arg(long, value_name = "FIELD")]
    longitude_field: Option<String>,

    #[arg(long, value_name = "FIELD")]
    latitude_field: Option<String>,

    #[arg(long, value_name = "FIELD")]
    state_code_field: Option<String>,

    #[arg(long, value_name = "FIELD")]
    district_key_field: Option<String>,

    #[arg(long, value_name = "FIELD")]
    date_field: Option<String>,

    /// 並列処理スレッド数（デフォルト: CPUコア数）
    #[arg(short, long)]
    threads: Option<usize>,

    /// 実行サマリーをJSONで出力
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

impl Args {
    fn check_set(&self) -> Result<CheckSet> {
        if !self.check.is_empty() {
            return Ok(CheckSet::from_checks(self.check.iter().copied()));
        }
        CheckSet::preset(self.checks as usize)
            .ok_or_else(|| anyhow!("--checks must be 2, 3 or 4, got {}", self.checks))
    }

    fn field_names(&self) -> FieldNames {
        let mut fields = FieldNames::default();
        let overrides = [
            (&self.longitude_field, &mut fields.longitude),
            (&self.latitude_field, &mut fields.latitude),
            (&self.state_code_field, &mut fields.state_code),
            (&self.district_key_field, &mut fields.district_key),
            (&self.date_field, &mut fields.commissioning_date),
        ];
        for (arg, field) in overrides {
            if let Some(name) = arg {
                *field = name.clone();
            }
        }
        fields
    }

    fn into_config(self) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            checks: self.check_set()?,
            fields: self.field_names(),
            input_dir: self.input,
            output_dir: self.output,
            states_path: self.states,
            districts_path: self.districts,
            code_tables_path: self.code_tables,
            partition: self.partition,
            format: self.format,
            tie_break: self.tie_break,
            ..PipelineConfig::default()
        })
    }
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    // CLI引数の解析
    let args = Args::parse();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    // スレッドプールの設定
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build thread pool")?;
    }

    if !args.input.is_dir() {
        anyhow::bail!("Input path must be a directory: {:?}", args.input);
    }
    // 出力ディレクトリの作成
    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory {:?}", args.output))?;

    let report_path = args.report.clone();
    let config = args.into_config()?;
    info!(
        "Checks: {}, partition: {}, format: {}",
        config.checks, config.partition, config.format
    );

    // 境界データとコード表の読み込み
    let pipeline = Pipeline::new(config).context("Failed to initialize pipeline")?;
    let summary = pipeline.run()?;

    for skipped in &summary.skipped {
        warn!("Skipped {:?}: {}", skipped.path, skipped.reason);
    }
    if let Some(path) = report_path {
        summary.write_report(&path)?;
        info!("Written run report: {:?}", path);
    }

    info!(
        "{} accepted, {} rejected, {} files skipped",
        summary.accepted(),
        summary.rejected(),
        summary.skipped.len()
    );
    // 処理時間を表示
    info!("Total processing time: {:?}", start_time.elapsed());

    Ok(())
}
