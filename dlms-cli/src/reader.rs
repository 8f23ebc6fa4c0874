//! Meter read-out printed on stdout and copied to an optional log file

use anyhow::{Context, Result};
use chrono::{Days, Local, NaiveDateTime};
use dlms_client::objects::{
    self, ObjectEntry, ASSOCIATION_VIEW, PROFILE_BUFFER, PROFILE_CAPTURE_OBJECTS,
    PROFILE_GENERIC_CLASS, PROFILE_SORT_OBJECT,
};
use dlms_client::{AttributeDescriptor, AttributeRead, DlmsClient, ProtocolEngine, Value};
use dlms_core::{to_hex, DlmsResult, ObisCode};
use dlms_transport::Media;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Default read-out copy of the command line reader
pub const LOG_FILE: &str = "logFile.txt";

/// Destination of the read-out lines
#[derive(Default)]
pub struct Report {
    copy: Option<BufWriter<File>>,
}

impl Report {
    /// Also copy every line to `path`, replacing an earlier read-out
    pub fn with_log_file(mut self, path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Cannot create {}", path.display()))?;
        self.copy = Some(BufWriter::new(file));
        Ok(self)
    }

    pub fn line(&mut self, text: &str) -> Result<()> {
        println!("{}", text);
        if let Some(copy) = &mut self.copy {
            writeln!(copy, "{}", text).context("Writing the log file failed")?;
        }
        Ok(())
    }
}

impl Drop for Report {
    fn drop(&mut self) {
        if let Some(copy) = &mut self.copy {
            let _ = copy.flush();
        }
    }
}

/// Printable form of an A-XDR value, hex when it does not decode
pub fn describe(data: &[u8]) -> String {
    match Value::decode(data) {
        Ok(value) => value.to_string(),
        Err(_) => to_hex(data),
    }
}

pub fn format_row(cells: &[Value]) -> String {
    cells
        .iter()
        .map(|cell| format!("{} | ", cell))
        .collect::<String>()
        .trim_end()
        .to_string()
}

fn print_reads(report: &mut Report, reads: &[AttributeRead]) -> Result<()> {
    for (attribute, value) in reads {
        let line = match value {
            Some(data) => format!("Index: {} Value: {}", attribute.attribute, describe(data)),
            None => format!("Index: {} Access denied", attribute.attribute),
        };
        report.line(&line)?;
    }
    Ok(())
}

/// Start of yesterday and now, in local time
fn last_day() -> (NaiveDateTime, NaiveDateTime) {
    let now = Local::now().naive_local();
    let start = now
        .date()
        .checked_sub_days(Days::new(1))
        .unwrap_or(now.date())
        .and_time(chrono::NaiveTime::MIN);
    (start, now)
}

/// Column a range read is sorted on
///
/// The profile's own sort object when the meter reports one, else the first
/// captured column.
fn range_sort(
    sort_object: DlmsResult<Vec<u8>>,
    columns: &[AttributeDescriptor],
) -> Result<Option<AttributeDescriptor>> {
    let sort = match sort_object {
        Ok(data) => objects::parse_sort_object(&data)?,
        Err(e) if e.is_access_denied() => None,
        Err(e) => return Err(e.into()),
    };
    Ok(sort.or_else(|| columns.first().copied()))
}

/// Read everything listed in the association view
///
/// Profile generics are returned for a separate read since their buffers
/// can take long.
async fn read_association_view<M, E>(
    client: &mut DlmsClient<M, E>,
    report: &mut Report,
) -> Result<Vec<ObisCode>>
where
    M: Media,
    E: ProtocolEngine,
{
    report.line("Reading association view")?;
    let data = client
        .read(&ASSOCIATION_VIEW)
        .await
        .context("Failed to read the association view")?;
    let objects = objects::parse_object_list(&data)?;
    let mut profiles = Vec::new();

    for object in &objects {
        if object.class_id == PROFILE_GENERIC_CLASS {
            profiles.push(object.obis);
            continue;
        }
        let attributes: Vec<AttributeDescriptor> = object
            .attributes_to_read()
            .iter()
            .map(|&index| object.attribute(index))
            .collect();
        if attributes.is_empty() {
            log::info!("skipping {} (class {})", object, object.class_id);
            continue;
        }
        report.line(&format!("-------- Reading {}", object))?;
        print_reads(report, &client.read_attributes(&attributes).await?)?;
    }
    Ok(profiles)
}

async fn read_profile<M, E>(
    client: &mut DlmsClient<M, E>,
    report: &mut Report,
    obis: ObisCode,
) -> Result<()>
where
    M: Media,
    E: ProtocolEngine,
{
    let profile = ObjectEntry {
        class_id: PROFILE_GENERIC_CLASS,
        version: 1,
        obis,
    };
    report.line(&format!("-------- Reading {}", profile))?;
    let data = client.read(&profile.attribute(PROFILE_CAPTURE_OBJECTS)).await?;
    let columns = objects::parse_capture_objects(&data)?;
    let header = columns
        .iter()
        .map(|column| column.obis.to_string())
        .collect::<Vec<_>>()
        .join(" | ");
    report.line(&header)?;

    let sort_object = client.read(&profile.attribute(PROFILE_SORT_OBJECT)).await;
    let buffer = profile.attribute(PROFILE_BUFFER);
    if let Some(sort) = range_sort(sort_object, &columns)? {
        log::debug!("range read sorted on {}", sort);
        let (start, end) = last_day();
        let data = client.read_rows_by_range(&buffer, &sort, start, end).await?;
        for row in objects::parse_rows(&data)? {
            report.line(&format_row(&row))?;
        }
    }

    report.line("First row")?;
    let data = client.read_rows_by_entry(&buffer, 1, 1).await?;
    for row in objects::parse_rows(&data)? {
        report.line(&format_row(&row))?;
    }
    Ok(())
}

/// Connect and read the requested attributes and profiles
///
/// Without explicit attributes or profiles the whole association view is
/// read.
pub async fn read_meter<M, E>(
    client: &mut DlmsClient<M, E>,
    report: &mut Report,
    reads: &[AttributeDescriptor],
    profiles: &[ObisCode],
) -> Result<()>
where
    M: Media,
    E: ProtocolEngine,
{
    client.connect().await?;

    let profiles = if reads.is_empty() && profiles.is_empty() {
        read_association_view(client, report).await?
    } else {
        if !reads.is_empty() {
            print_reads(report, &client.read_attributes(reads).await?)?;
        }
        profiles.to_vec()
    };

    for obis in profiles {
        read_profile(client, report, obis).await?;
    }
    Ok(())
}
