
use fixtures::*;

use evtx_decode::err::{ChunkError, DeserializationError, EvtxError};
use evtx_decode::{EvtxParser, OutputFormat, ParserSettings};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const SECURITY_EVENT_PRETTY: &str = r#"<Event xmlns="http://schemas.microsoft.com/win/2004/08/events/event">
  <System>
    <Provider Name="Microsoft-Windows-Security-Auditing" Guid="{76543210-BA98-FEDC-0123-456789ABCDEF}" />
    <EventID>
      4624
    </EventID>
    <TimeCreated SystemTime="2019-03-28T12:34:56.123456700Z" />
    <EventRecordID>
      1
    </EventRecordID>
    <Correlation />
  </System>
  <EventData>
    <Data Name="SubjectUserSid">
      S-1-5-21-2
    </Data>
    <Data Name="LogonType">
      %%1843
    </Data>
  </EventData>
</Event>"#;

fn parser_for(file: Vec<u8>, settings: ParserSettings) -> EvtxParser<std::io::Cursor<Vec<u8>>> {
    ensure_env_logger_initialized();
    EvtxParser::from_buffer(file)
        .unwrap()
        .with_configuration(settings.num_threads(1))
}

fn record_offset(chunk: &[u8], index: usize) -> usize {
    let mut offset = EVTX_CHUNK_HEADER_SIZE;
    for _ in 0..index {
        let size = u32::from_le_bytes(chunk[offset + 4..offset + 8].try_into().unwrap()) as usize;
        offset = (offset + size + 7) & !7;
    }
    offset
}

#[test]
fn test_security_event_renders_pretty_xml() {
    let mut parser = parser_for(security_log(&[4624]), ParserSettings::new());

    let records: Vec<_> = parser.records_xml().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event_record_id, 1);
    assert_eq!(records[0].data, SECURITY_EVENT_PRETTY);
}

#[test]
fn test_record_header_timestamp() {
    let mut parser = parser_for(security_log(&[4624, 4624]), ParserSettings::new());

    let timestamps: Vec<String> = parser
        .records()
        .map(|r| evtx_decode::format_timestamp(r.unwrap().timestamp))
        .collect();
    assert_eq!(
        timestamps,
        vec![
            "2019-03-28T12:34:56.123456700Z".to_string(),
            "2019-03-28T12:34:57.123456700Z".to_string(),
        ]
    );
}

#[test]
fn test_compact_output() {
    let settings = ParserSettings::new().output_format(OutputFormat::Compact);
    let mut parser = parser_for(security_log(&[4624]), settings);

    let record = parser.records_xml().next().unwrap().unwrap();
    assert_eq!(
        record.data,
        concat!(
            r#"<Event xmlns="http://schemas.microsoft.com/win/2004/08/events/event">"#,
            "<System>",
            r#"<Provider Name="Microsoft-Windows-Security-Auditing" Guid="{76543210-BA98-FEDC-0123-456789ABCDEF}"/>"#,
            "<EventID>4624</EventID>",
            r#"<TimeCreated SystemTime="2019-03-28T12:34:56.123456700Z"/>"#,
            "<EventRecordID>1</EventRecordID>",
            "<Correlation/>",
            "</System>",
            "<EventData>",
            r#"<Data Name="SubjectUserSid">S-1-5-21-2</Data>"#,
            r#"<Data Name="LogonType">%%1843</Data>"#,
            "</EventData>",
            "</Event>",
        )
    );
}

#[test]
fn test_flattened_output() {
    let settings = ParserSettings::new().output_format(OutputFormat::Flattened);
    let mut parser = parser_for(security_log(&[4624]), settings);

    let record = parser.records_xml().next().unwrap().unwrap();
    assert_eq!(
        record.data.lines().collect::<Vec<_>>(),
        vec![
            "Event.xmlns: http://schemas.microsoft.com/win/2004/08/events/event",
            "Provider.Name: Microsoft-Windows-Security-Auditing",
            "Provider.Guid: {76543210-BA98-FEDC-0123-456789ABCDEF}",
            "EventID: 4624",
            "TimeCreated.SystemTime: 2019-03-28T12:34:56.123456700Z",
            "EventRecordID: 1",
            "Data: S-1-5-21-2",
            "Data.Name: SubjectUserSid",
            "Data: %%1843",
            "Data.Name: LogonType",
        ]
    );
}

#[test]
fn test_resolves_message_references_when_enabled() {
    let settings = ParserSettings::new().resolve_messages(true);
    let mut parser = parser_for(security_log(&[4624]), settings);

    let record = parser.records().next().unwrap().unwrap();
    let event_data = record.tree.find_path(&["Event", "EventData"]).unwrap();
    let logon_type = *record.tree.element(event_data).children.last().unwrap();
    assert_eq!(record.tree.element(logon_type).visible_text(), Some("Network"));
}

#[test]
fn test_template_definition_is_shared_between_records() {
    let mut parser = parser_for(security_log(&[4624, 4625, 4634]), ParserSettings::new());

    let records: Vec<_> = parser.records().map(|r| r.unwrap()).collect();
    let event_ids: Vec<_> = records.iter().map(|r| r.event_id().unwrap()).collect();
    assert_eq!(event_ids, vec!["4624", "4625", "4634"]);

    for record in &records {
        let node = record
            .tree
            .find_path(&["Event", "System", "EventRecordID"])
            .unwrap();
        assert_eq!(
            record.tree.element(node).visible_text(),
            Some(record.event_record_id.to_string().as_str())
        );
    }
}

#[test]
fn test_record_count_matches_chunk_header() {
    let mut parser = parser_for(
        security_log(&[4624, 4625, 4624, 4634, 4672]),
        ParserSettings::new(),
    );
    let settings = Arc::new(ParserSettings::new());

    let chunks: Vec<_> = parser.chunks().map(|c| c.unwrap()).collect();
    assert_eq!(chunks.len(), 1);

    let chunk_data = &chunks[0];
    assert!(chunk_data.validate_checksum());
    let header = &chunk_data.header;
    let mut chunk = chunk_data.parse(settings);
    let count = chunk.iter().filter(|r| r.is_ok()).count() as u64;

    assert_eq!(header.last_event_record_id - header.first_event_record_id + 1, 5);
    assert_eq!(count, 5);
}

#[test]
fn test_records_span_multiple_chunks() {
    let mut first = ChunkBuilder::new(1);
    let mut second = ChunkBuilder::new(3);
    for id in 1..=2 {
        first.add_template_record(1, security_event_template, &security_event_values(4624, id));
    }
    for id in 3..=4 {
        second.add_template_record(1, security_event_template, &security_event_values(4625, id));
    }
    let file = build_file(&[first.build(), second.build()]);

    let mut parser = parser_for(file, ParserSettings::new());
    assert_eq!(parser.header().chunk_count, 2);
    assert!(!parser.header().is_dirty());

    let ids: Vec<_> = parser.records().map(|r| r.unwrap().event_record_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[test]
fn test_event_id_filter() {
    let settings = ParserSettings::new().event_id_filter(Some(4624));
    let mut parser = parser_for(security_log(&[4624, 4625, 4624, 4634]), settings);

    let ids: Vec<_> = parser.records().map(|r| r.unwrap().event_record_id).collect();
    assert_eq!(ids, vec![1, 3]);
}

#[test]
fn test_embedded_binxml_is_attached_to_substituting_element() {
    let mut chunk = ChunkBuilder::new(1);
    chunk.add_template_record(
        9,
        |w| {
            w.fragment_header();
            w.open("Event");
            w.close_start();
            w.open("UserData");
            w.close_start();
            w.substitution(0, 0x21);
            w.end();
            w.end();
            w.eof();
        },
        &[Value::BinXml(Box::new(|w: &mut BinXmlWriter| {
            w.fragment_header();
            w.open_with_attributes("LogFileCleared");
            w.attribute("xmlns");
            w.text("urn:cleared");
            w.close_start();
            w.element_with_text("SubjectUserName", "admin");
            w.end();
            w.eof();
        }))],
    );

    let settings = ParserSettings::new().output_format(OutputFormat::Compact);
    let mut parser = parser_for(build_file(&[chunk.build()]), settings);

    let record = parser.records_xml().next().unwrap().unwrap();
    assert_eq!(
        record.data,
        r#"<Event><UserData><LogFileCleared xmlns="urn:cleared"><SubjectUserName>admin</SubjectUserName></LogFileCleared></UserData></Event>"#
    );
}

#[test]
fn test_empty_string_value_keeps_element_open() {
    let mut values = security_event_values(4624, 1);
    values[7] = Value::EmptyString;

    let mut chunk = ChunkBuilder::new(1);
    chunk.add_template_record(1, security_event_template, &values);
    let mut parser = parser_for(build_file(&[chunk.build()]), ParserSettings::new());

    let record = parser.records_xml().next().unwrap().unwrap();
    assert!(
        record.data.contains(r#"    <Data Name="LogonType"></Data>"#),
        "{}",
        record.data
    );
}

#[test]
fn test_missing_template_marker_does_not_stop_iteration() {
    let mut chunk = ChunkBuilder::new(1);
    chunk.add_raw_record(|w| {
        w.fragment_header();
        w.open("Stray");
        w.close_empty();
        w.eof();
    });
    chunk.add_template_record(1, security_event_template, &security_event_values(4624, 2));

    let mut parser = parser_for(build_file(&[chunk.build()]), ParserSettings::new());
    let records: Vec<_> = parser.records().collect();

    assert_eq!(records.len(), 2);
    assert!(matches!(
        records[0],
        Err(EvtxError::FailedToDeserializeRecord {
            record_id: 1,
            source: DeserializationError::MissingTemplateMarker { .. }
        })
    ));
    assert_eq!(records[1].as_ref().unwrap().event_id(), Some("4624"));
}

#[test]
fn test_truncated_record_is_reported() {
    let mut builder = ChunkBuilder::new(1);
    for id in 1..=2 {
        builder.add_template_record(1, security_event_template, &security_event_values(4624, id));
    }
    let mut chunk = builder.build();
    let second = record_offset(&chunk, 1);
    chunk[second + 4..second + 8].copy_from_slice(&0x0002_0000_u32.to_le_bytes());

    let mut parser = parser_for(build_file(&[chunk]), ParserSettings::new());
    let records: Vec<_> = parser.records().collect();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].as_ref().unwrap().event_record_id, 1);
    assert!(matches!(
        records[1],
        Err(EvtxError::FailedToDeserializeRecord { record_id: 2, .. })
    ));
}

#[test]
fn test_unrepresentable_timestamp_costs_only_that_record() {
    let mut builder = ChunkBuilder::new(1);
    for (id, event_id) in [(1, 4624), (2, 4625), (3, 4634)] {
        builder.add_template_record(
            1,
            security_event_template,
            &security_event_values(event_id, id),
        );
    }
    let mut chunk = builder.build();
    let first = record_offset(&chunk, 0);
    chunk[first + 16..first + 24].copy_from_slice(&u64::MAX.to_le_bytes());

    let mut parser = parser_for(build_file(&[chunk]), ParserSettings::new());
    let records: Vec<_> = parser.records().collect();

    assert_eq!(records.len(), 3);
    assert!(matches!(
        records[0],
        Err(EvtxError::FailedToDeserializeRecord {
            record_id: 1,
            source: DeserializationError::InvalidDateTimeError
        })
    ));
    let event_ids: Vec<_> = records[1..]
        .iter()
        .map(|r| r.as_ref().unwrap().event_id().unwrap().to_string())
        .collect();
    assert_eq!(event_ids, vec!["4625", "4634"]);
}

#[test]
fn test_undersized_record_ends_chunk() {
    let mut builder = ChunkBuilder::new(1);
    for id in 1..=3 {
        builder.add_template_record(1, security_event_template, &security_event_values(4624, id));
    }
    let mut chunk = builder.build();
    let second = record_offset(&chunk, 1);
    chunk[second + 4..second + 8].copy_from_slice(&28_u32.to_le_bytes());

    let mut parser = parser_for(build_file(&[chunk]), ParserSettings::new());
    let records: Vec<_> = parser.records().collect();

    assert_eq!(records.len(), 2);
    assert!(records[0].is_ok());
    assert!(matches!(
        records[1],
        Err(EvtxError::ChunkError(ChunkError::RecordTooSmall { size: 28, .. }))
    ));
}

#[test]
fn test_bad_chunk_magic_skips_only_that_chunk() {
    let mut first = ChunkBuilder::new(1);
    first.add_template_record(1, security_event_template, &security_event_values(4624, 1));
    let mut second = ChunkBuilder::new(2);
    second.add_template_record(1, security_event_template, &security_event_values(4625, 2));

    let mut broken = first.build();
    broken[..8].copy_from_slice(b"NotAChk\x00");
    let file = build_file(&[broken, second.build()]);

    let mut parser = parser_for(file, ParserSettings::new());
    let records: Vec<_> = parser.records().collect();

    assert_eq!(records.len(), 2);
    assert!(matches!(
        records[0],
        Err(EvtxError::FailedToParseChunk {
            chunk_number: 0,
            source: ChunkError::InvalidChunkMagic { .. }
        })
    ));
    assert_eq!(records[1].as_ref().unwrap().event_record_id, 2);
}

#[test]
fn test_checksums_are_only_enforced_when_requested() {
    let mut chunk = ChunkBuilder::new(1);
    chunk.add_template_record(1, security_event_template, &security_event_values(4624, 1));
    let mut chunk = chunk.build();
    // Unused header bytes, covered by the header checksum.
    chunk[0x40] ^= 0xff;
    let file = build_file(&[chunk]);

    let mut lenient = parser_for(file.clone(), ParserSettings::new());
    assert_eq!(lenient.records().filter(|r| r.is_ok()).count(), 1);

    let mut strict = parser_for(file, ParserSettings::new().validate_checksums(true));
    let records: Vec<_> = strict.records().collect();
    assert_eq!(records.len(), 1);
    assert!(matches!(
        records[0],
        Err(EvtxError::FailedToParseChunk {
            source: ChunkError::InvalidChunkHeaderChecksum { .. },
            ..
        })
    ));
}

#[test]
fn test_data_checksum_covers_record_area() {
    let mut chunk = ChunkBuilder::new(1);
    chunk.add_template_record(1, security_event_template, &security_event_values(4624, 1));
    let mut chunk = chunk.build();
    // The template definition's GUID bytes are never rendered.
    let guid_at = chunk
        .windows(12)
        .position(|w| w.iter().all(|&b| b == 0x5a))
        .unwrap();
    chunk[guid_at] = 0xa5;
    let file = build_file(&[chunk]);

    let mut strict = parser_for(file, ParserSettings::new().validate_checksums(true));
    let first = strict.records().next().unwrap();
    assert!(matches!(
        first,
        Err(EvtxError::FailedToParseChunk {
            source: ChunkError::InvalidChunkDataChecksum { .. },
            ..
        })
    ));
}

#[test]
fn test_recursion_limit_applies_to_embedded_binxml() {
    let mut chunk = ChunkBuilder::new(1);
    chunk.add_template_record(
        2,
        |w| {
            w.fragment_header();
            w.open("Event");
            w.close_start();
            w.substitution(0, 0x21);
            w.end();
            w.eof();
        },
        &[Value::BinXml(Box::new(|w: &mut BinXmlWriter| {
            w.fragment_header();
            w.open("Nested");
            w.close_empty();
            w.eof();
        }))],
    );
    let file = build_file(&[chunk.build()]);

    let mut parser = parser_for(file, ParserSettings::new().max_recursion_depth(0));
    let first = parser.records().next().unwrap();
    assert!(matches!(
        first,
        Err(EvtxError::FailedToDeserializeRecord {
            source: DeserializationError::RecursionLimitExceeded { limit: 0, .. },
            ..
        })
    ));
}
