use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use polars::prelude::*;
use tracing::debug;

use crate::config::{inject_default_index, require_path, Options, Params, ResourceConfig};
use crate::error::{ResourceError, Result};
use crate::frame::normalize_missing;
use crate::options::OptionReader;
use crate::resource::{describe, ensure_unbuffered, DataSink, DataSource, Raw, Resource, ResourceKind};

pub const SUPPORTED_FILE_TYPES: [&str; 4] = ["csv", "euro_csv", "text_file", "binary_file"];

const CSV_READ_OPTIONS: &[&str] = &[
    "header",
    "skiprows",
    "nrows",
    "usecols",
    "na_values",
    "quotechar",
    "infer_schema_length",
    "encoding",
    "dtype",
    "ignore_errors",
];

const CSV_WRITE_OPTIONS: &[&str] = &[
    "index",
    "index_label",
    "header",
    "na_rep",
    "float_precision",
    "quotechar",
    "line_terminator",
    "date_format",
    "datetime_format",
];

const RAW_READ_OPTIONS: &[&str] = &["size"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Csv,
    EuroCsv,
    TextFile,
    BinaryFile,
}

impl FileType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "csv" => Some(FileType::Csv),
            "euro_csv" => Some(FileType::EuroCsv),
            "text_file" => Some(FileType::TextFile),
            "binary_file" => Some(FileType::BinaryFile),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::EuroCsv => "euro_csv",
            FileType::TextFile => "text_file",
            FileType::BinaryFile => "binary_file",
        }
    }

    pub fn is_tabular(&self) -> bool {
        matches!(self, FileType::Csv | FileType::EuroCsv)
    }

    // `euro_csv` differs from `csv` only in these two settings.
    fn separator(&self) -> u8 {
        match self {
            FileType::EuroCsv => b';',
            _ => b',',
        }
    }

    fn decimal_comma(&self) -> bool {
        matches!(self, FileType::EuroCsv)
    }
}

/// What a file source and a file sink have in common: the identifier, the
/// owned configuration and the resolved type and path.
#[derive(Debug, Clone)]
struct FileBinding {
    kind: ResourceKind,
    id: String,
    config: ResourceConfig,
    file_type: FileType,
    path: PathBuf,
}

impl FileBinding {
    fn new(kind: ResourceKind, id: String, config: ResourceConfig) -> Result<Self> {
        let file_type = FileType::from_tag(&config.resource_type).ok_or_else(|| {
            ResourceError::configuration(format!(
                "'{}' is not a {kind} file type (in {kind} '{id}')",
                config.resource_type
            ))
        })?;
        let path = require_path(&config, &describe(kind, &id))?.to_path_buf();

        Ok(Self {
            kind,
            id,
            config,
            file_type,
            path,
        })
    }

    fn label(&self) -> String {
        describe(self.kind, &self.id)
    }

    fn unsupported(&self, method: &'static str, use_instead: &'static str) -> ResourceError {
        ResourceError::UnsupportedOperation {
            resource: format!("{} of type {}", self.label(), self.file_type.tag()),
            method,
            use_instead,
        }
    }

    fn reader(&self) -> OptionReader<'_> {
        OptionReader::new(&self.config.options, self.label())
    }
}

/// Reads `csv`, `euro_csv`, `text_file` and `binary_file` resources.
#[derive(Debug, Clone)]
pub struct FileDataSource {
    binding: FileBinding,
}

impl FileDataSource {
    pub fn new(id: impl Into<String>, config: ResourceConfig) -> Result<Self> {
        let binding = FileBinding::new(ResourceKind::Source, id.into(), config)?;
        Ok(Self { binding })
    }

    pub fn file_type(&self) -> FileType {
        self.binding.file_type
    }

    pub fn path(&self) -> &Path {
        &self.binding.path
    }
}

impl Resource for FileDataSource {
    fn id(&self) -> &str {
        &self.binding.id
    }

    fn config(&self) -> &ResourceConfig {
        &self.binding.config
    }
}

impl DataSource for FileDataSource {
    fn get_dataframe(&mut self, _params: Option<&Params>, buffer: bool) -> Result<DataFrame> {
        ensure_unbuffered(buffer, "reading")?;
        let binding = &self.binding;
        if !binding.file_type.is_tabular() {
            return Err(binding.unsupported("get_dataframe", "get_raw"));
        }

        debug!(
            file_type = binding.file_type.tag(),
            path = %binding.path.display(),
            options = ?binding.config.options,
            "loading dataframe from file"
        );
        read_csv(&binding.path, binding.file_type, &binding.reader())
    }

    fn get_raw(&mut self, _params: Option<&Params>, buffer: bool) -> Result<Raw> {
        ensure_unbuffered(buffer, "reading")?;
        let binding = &self.binding;
        if binding.file_type.is_tabular() {
            return Err(binding.unsupported("get_raw", "get_dataframe"));
        }

        let reader = binding.reader();
        reader.allow_only(RAW_READ_OPTIONS)?;
        let size = reader.usize("size")?;

        debug!(
            file_type = binding.file_type.tag(),
            path = %binding.path.display(),
            options = ?binding.config.options,
            "loading raw file"
        );
        let raw = match binding.file_type {
            FileType::TextFile => {
                let text = fs::read_to_string(&binding.path)?;
                Raw::Text(match size {
                    Some(limit) => text.chars().take(limit).collect(),
                    None => text,
                })
            }
            _ => {
                let mut bytes = fs::read(&binding.path)?;
                if let Some(limit) = size {
                    bytes.truncate(limit);
                }
                Raw::Bytes(bytes)
            }
        };
        Ok(raw)
    }
}

/// Writes `csv`, `euro_csv`, `text_file` and `binary_file` resources.
/// Existing files are always replaced, never appended to.
#[derive(Debug, Clone)]
pub struct FileDataSink {
    binding: FileBinding,
}

impl FileDataSink {
    pub fn new(id: impl Into<String>, mut config: ResourceConfig) -> Result<Self> {
        if FileType::from_tag(&config.resource_type).is_some_and(|t| t.is_tabular()) {
            inject_default_index(&mut config.options);
        }
        let binding = FileBinding::new(ResourceKind::Sink, id.into(), config)?;
        Ok(Self { binding })
    }

    pub fn file_type(&self) -> FileType {
        self.binding.file_type
    }

    pub fn path(&self) -> &Path {
        &self.binding.path
    }
}

impl Resource for FileDataSink {
    fn id(&self) -> &str {
        &self.binding.id
    }

    fn config(&self) -> &ResourceConfig {
        &self.binding.config
    }
}

impl DataSink for FileDataSink {
    fn put_dataframe(
        &mut self,
        dataframe: &DataFrame,
        _params: Option<&Params>,
        buffer: bool,
    ) -> Result<()> {
        ensure_unbuffered(buffer, "writing")?;
        let binding = &self.binding;
        if !binding.file_type.is_tabular() {
            return Err(binding.unsupported("put_dataframe", "put_raw"));
        }

        debug!(
            file_type = binding.file_type.tag(),
            path = %binding.path.display(),
            options = ?binding.config.options,
            "writing dataframe to file"
        );
        write_csv(&binding.path, binding.file_type, dataframe, &binding.reader())
    }

    fn put_raw(&mut self, raw: Raw, _params: Option<&Params>, buffer: bool) -> Result<()> {
        ensure_unbuffered(buffer, "writing")?;
        let binding = &self.binding;
        if binding.file_type.is_tabular() {
            return Err(binding.unsupported("put_raw", "put_dataframe"));
        }
        binding.reader().allow_only(&[])?;

        debug!(
            file_type = binding.file_type.tag(),
            path = %binding.path.display(),
            bytes = raw.len(),
            "writing raw file"
        );
        match (binding.file_type, &raw) {
            (FileType::TextFile, Raw::Bytes(_)) => Err(ResourceError::InvalidPayload {
                resource: binding.label(),
                expected: "text",
            }),
            _ => {
                fs::write(&binding.path, raw.as_bytes())?;
                Ok(())
            }
        }
    }
}

fn read_csv(path: &Path, file_type: FileType, reader: &OptionReader<'_>) -> Result<DataFrame> {
    reader.allow_only(CSV_READ_OPTIONS)?;

    let mut parse_options = CsvParseOptions::default()
        .with_separator(file_type.separator())
        .with_decimal_comma(file_type.decimal_comma());
    if let Some(quote) = reader.ascii_char("quotechar")? {
        parse_options = parse_options.with_quote_char(Some(quote));
    }
    if let Some(na_values) = reader.string_list("na_values")? {
        let na_values = na_values.into_iter().map(PlSmallStr::from).collect();
        parse_options = parse_options.with_null_values(Some(NullValues::AllColumns(na_values)));
    }
    if let Some(encoding) = reader.str("encoding")? {
        parse_options = parse_options.with_encoding(csv_encoding(encoding)?);
    }

    let mut read_options = CsvReadOptions::default().with_parse_options(parse_options);
    if let Some(has_header) = reader.bool("header")? {
        read_options = read_options.with_has_header(has_header);
    }
    if let Some(skip_rows) = reader.usize("skiprows")? {
        read_options = read_options.with_skip_rows(skip_rows);
    }
    if let Some(n_rows) = reader.usize("nrows")? {
        read_options = read_options.with_n_rows(Some(n_rows));
    }
    if let Some(columns) = reader.string_list("usecols")? {
        let columns: Arc<[PlSmallStr]> = columns.into_iter().map(PlSmallStr::from).collect();
        read_options = read_options.with_columns(Some(columns));
    }
    if let Some(length) = reader.nullable_usize("infer_schema_length")? {
        read_options = read_options.with_infer_schema_length(length);
    }
    if let Some(ignore_errors) = reader.bool("ignore_errors")? {
        read_options = read_options.with_ignore_errors(ignore_errors);
    }
    if let Some(dtypes) = reader.table("dtype")? {
        read_options = read_options.with_schema_overwrite(Some(Arc::new(dtype_schema(dtypes)?)));
    }

    let df = read_options
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    normalize_missing(df)
}

fn write_csv(
    path: &Path,
    file_type: FileType,
    dataframe: &DataFrame,
    reader: &OptionReader<'_>,
) -> Result<()> {
    reader.allow_only(CSV_WRITE_OPTIONS)?;

    let mut frame = if reader.bool("index")?.unwrap_or(false) {
        let label = reader.str("index_label")?.unwrap_or("");
        dataframe.with_row_index(PlSmallStr::from(label), None)?
    } else {
        dataframe.clone()
    };

    let header = reader.bool("header")?.unwrap_or(true);
    let na_rep = reader.str("na_rep")?;
    let float_precision = reader.usize("float_precision")?;
    let quote = reader.ascii_char("quotechar")?;
    let line_terminator = reader.str("line_terminator")?;
    let date_format = reader.str("date_format")?;
    let datetime_format = reader.str("datetime_format")?;

    if file_type.decimal_comma() {
        frame = with_decimal_commas(frame, float_precision)?;
    }

    let mut file = File::create(path)?;
    let mut writer = CsvWriter::new(&mut file)
        .include_header(header)
        .with_separator(file_type.separator())
        .with_float_precision(float_precision);
    if let Some(na_rep) = na_rep {
        writer = writer.with_null_value(na_rep.to_string());
    }
    if let Some(quote) = quote {
        writer = writer.with_quote_char(quote);
    }
    if let Some(terminator) = line_terminator {
        writer = writer.with_line_terminator(terminator.to_string());
    }
    if let Some(format) = date_format {
        writer = writer.with_date_format(Some(format.to_string()));
    }
    if let Some(format) = datetime_format {
        writer = writer.with_datetime_format(Some(format.to_string()));
    }
    writer.finish(&mut frame)?;
    Ok(())
}

/// Render float columns as text with `,` as the decimal mark. The CSV writer
/// only knows `.`, so these columns reach it already formatted.
fn with_decimal_commas(mut frame: DataFrame, precision: Option<usize>) -> Result<DataFrame> {
    let float_columns: Vec<PlSmallStr> = frame
        .get_columns()
        .iter()
        .filter(|column| column.dtype().is_float())
        .map(|column| column.name().clone())
        .collect();

    for name in float_columns {
        let values = frame.column(name.as_str())?.cast(&DataType::Float64)?;
        let formatted: Vec<Option<String>> = values
            .f64()?
            .into_iter()
            .map(|value| value.map(|v| format_decimal_comma(v, precision)))
            .collect();
        frame.with_column(Column::new(name, formatted))?;
    }
    Ok(frame)
}

fn format_decimal_comma(value: f64, precision: Option<usize>) -> String {
    // `{:?}` keeps a trailing `.0` so whole numbers still read back as floats.
    let text = match precision {
        Some(digits) => format!("{value:.digits$}"),
        None => format!("{value:?}"),
    };
    text.replace('.', ",")
}

fn csv_encoding(name: &str) -> Result<CsvEncoding> {
    match name.to_ascii_lowercase().as_str() {
        "utf8" | "utf-8" => Ok(CsvEncoding::Utf8),
        "utf8-lossy" | "utf-8-lossy" => Ok(CsvEncoding::LossyUtf8),
        other => Err(ResourceError::configuration(format!(
            "unsupported csv encoding '{other}' (expected utf-8 or utf8-lossy)"
        ))),
    }
}

fn dtype_schema(dtypes: &Options) -> Result<Schema> {
    let mut schema = Schema::with_capacity(dtypes.len());
    for (column, value) in dtypes {
        let name = value.as_str().unwrap_or_default();
        let dtype = match name {
            "int" | "int64" => DataType::Int64,
            "float" | "float64" => DataType::Float64,
            "str" | "string" => DataType::String,
            "bool" => DataType::Boolean,
            _ => {
                return Err(ResourceError::configuration(format!(
                    "unsupported dtype {value} for column '{column}' (expected int, float, str or bool)"
                )))
            }
        };
        schema.with_column(PlSmallStr::from(column.as_str()), dtype);
    }
    Ok(schema)
}
