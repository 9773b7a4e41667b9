use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::{BytesText, Event};
use thiserror::Error;

use crate::title::NS_MAIN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub title: String,
    pub namespace: i32,
    pub text: String,
}

impl Page {
    pub fn is_article(&self) -> bool {
        self.namespace == NS_MAIN
    }
}

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("failed to open dump {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed dump XML near byte {position}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },
    #[error("malformed page {}: {reason}", title.as_deref().unwrap_or("<untitled>"))]
    Page {
        title: Option<String>,
        reason: String,
    },
}

impl DumpError {
    /// Page-level errors only affect one record; the stream keeps going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Page { .. })
    }
}

/// Source of page records. Every call starts a fresh pass over the dump.
pub trait DumpReader {
    type Pages: Iterator<Item = Result<Page, DumpError>>;

    /// Pages with empty bodies; cheaper when only titles are needed.
    fn titles(&self) -> Result<Self::Pages, DumpError>;

    fn pages(&self) -> Result<Self::Pages, DumpError>;
}

/// MediaWiki XML export (`pages-articles.xml` and friends), uncompressed.
#[derive(Debug, Clone)]
pub struct XmlDump {
    path: PathBuf,
}

impl XmlDump {
    pub fn open(path: &Path) -> Result<Self, DumpError> {
        // Fail up front on a missing file rather than on the first pass.
        File::open(path).map_err(|source| DumpError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn pass(&self, include_text: bool) -> Result<XmlPages<BufReader<File>>, DumpError> {
        let file = File::open(&self.path).map_err(|source| DumpError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(XmlPages::new(BufReader::new(file), include_text))
    }
}

impl DumpReader for XmlDump {
    type Pages = XmlPages<BufReader<File>>;

    fn titles(&self) -> Result<Self::Pages, DumpError> {
        self.pass(false)
    }

    fn pages(&self) -> Result<Self::Pages, DumpError> {
        self.pass(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Namespace,
    Text,
}

#[derive(Debug, Default)]
struct PageBuilder {
    title: Option<String>,
    namespace: String,
    text: String,
    problem: Option<String>,
}

impl PageBuilder {
    fn finish(self) -> Result<Page, DumpError> {
        let Some(title) = self.title else {
            return Err(DumpError::Page {
                title: None,
                reason: self.problem.unwrap_or_else(|| "missing <title>".to_string()),
            });
        };
        if let Some(reason) = self.problem {
            return Err(DumpError::Page {
                title: Some(title),
                reason,
            });
        }
        let namespace = self
            .namespace
            .trim()
            .parse::<i32>()
            .map_err(|_| DumpError::Page {
                title: Some(title.clone()),
                reason: format!("invalid <ns> value {:?}", self.namespace),
            })?;
        Ok(Page {
            title,
            namespace,
            text: self.text,
        })
    }
}

/// Streaming page iterator. Stops for good after the first stream-level error.
pub struct XmlPages<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    path: Vec<Vec<u8>>,
    field: Option<Field>,
    current: Option<PageBuilder>,
    include_text: bool,
    finished: bool,
}

impl<R: BufRead> XmlPages<R> {
    pub fn new(source: R, include_text: bool) -> Self {
        Self {
            reader: Reader::from_reader(source),
            buf: Vec::new(),
            path: Vec::new(),
            field: None,
            current: None,
            include_text,
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for XmlPages<R> {
    type Item = Result<Page, DumpError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(source) => {
                    self.finished = true;
                    return Some(Err(DumpError::Xml {
                        position: self.reader.buffer_position() as u64,
                        source,
                    }));
                }
            };

            match event {
                Event::Start(start) => {
                    let name = start.local_name().as_ref().to_vec();
                    let parent = self.path.last().map(Vec::as_slice);
                    self.field = None;
                    match (parent, name.as_slice()) {
                        (_, b"page") => self.current = Some(PageBuilder::default()),
                        (Some(b"page"), b"title") => self.field = Some(Field::Title),
                        (Some(b"page"), b"ns") => self.field = Some(Field::Namespace),
                        (Some(b"revision"), b"text") => {
                            // Later revisions replace earlier ones.
                            if let Some(page) = self.current.as_mut() {
                                page.text.clear();
                            }
                            self.field = Some(Field::Text);
                        }
                        _ => {}
                    }
                    self.path.push(name);
                }
                Event::Text(text) => {
                    if let (Some(field), Some(page)) = (self.field, self.current.as_mut()) {
                        append_text(page, field, &text, self.include_text);
                    }
                }
                Event::CData(data) => {
                    if let (Some(field), Some(page)) = (self.field, self.current.as_mut()) {
                        let raw = String::from_utf8_lossy(&data);
                        append_str(page, field, &raw, self.include_text);
                    }
                }
                Event::End(end) => {
                    self.path.pop();
                    self.field = None;
                    if end.local_name().as_ref() == b"page"
                        && let Some(page) = self.current.take()
                    {
                        return Some(page.finish());
                    }
                }
                Event::Eof => {
                    self.finished = true;
                    return None;
                }
                _ => {}
            }
        }
    }
}

fn append_text(page: &mut PageBuilder, field: Field, text: &BytesText<'_>, include_text: bool) {
    if field == Field::Text && !include_text {
        return;
    }
    match text.unescape() {
        Ok(value) => append_str(page, field, &value, include_text),
        Err(error) => {
            if page.problem.is_none() {
                page.problem = Some(format!("undecodable text: {error}"));
            }
        }
    }
}

fn append_str(page: &mut PageBuilder, field: Field, value: &str, include_text: bool) {
    match field {
        Field::Title => page.title.get_or_insert_with(String::new).push_str(value),
        Field::Namespace => page.namespace.push_str(value),
        Field::Text if include_text => page.text.push_str(value),
        Field::Text => {}
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;

    use tempfile::tempdir;

    use super::*;

    const SAMPLE: &str = r#"<mediawiki xmlns="http://www.mediawiki.org/xml/export-0.11/" version="0.11">
  <siteinfo>
    <sitename>Test</sitename>
    <namespaces><namespace key="0" case="first-letter" /></namespaces>
  </siteinfo>
  <page>
    <title>P0</title>
    <ns>0</ns>
    <id>1</id>
    <revision>
      <id>10</id>
      <contributor><username>Someone</username><id>5</id></contributor>
      <text bytes="28" xml:space="preserve">See [[P1]] &amp; [[Missing]]</text>
    </revision>
  </page>
  <page>
    <title>P1</title>
    <ns>0</ns>
    <id>2</id>
    <redirect title="P0 &amp; co" />
    <revision><id>11</id><text xml:space="preserve">#REDIRECT [[P0]]</text></revision>
  </page>
  <page>
    <title>Category:Things</title>
    <ns>14</ns>
    <id>3</id>
    <revision><id>12</id><text xml:space="preserve" /></revision>
  </page>
</mediawiki>
"#;

    fn collect(source: &str, include_text: bool) -> Vec<Result<Page, DumpError>> {
        XmlPages::new(Cursor::new(source.as_bytes()), include_text).collect()
    }

    #[test]
    fn reads_pages_with_namespace_and_text() {
        let pages: Vec<Page> = collect(SAMPLE, true)
            .into_iter()
            .collect::<Result<_, _>>()
            .expect("pages");

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].title, "P0");
        assert!(pages[0].is_article());
        assert_eq!(pages[0].text, "See [[P1]] & [[Missing]]");
        assert_eq!(pages[1].text, "#REDIRECT [[P0]]");
        assert_eq!(pages[2].namespace, 14);
        assert!(pages[2].text.is_empty());
    }

    #[test]
    fn title_pass_skips_bodies() {
        let pages: Vec<Page> = collect(SAMPLE, false)
            .into_iter()
            .collect::<Result<_, _>>()
            .expect("pages");
        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|page| page.text.is_empty()));
    }

    #[test]
    fn keeps_last_revision_text() {
        let xml = "<mediawiki><page><title>A</title><ns>0</ns>\
            <revision><text>old [[X]]</text></revision>\
            <revision><text>new [[Y]]</text></revision></page></mediawiki>";
        let pages = collect(xml, true);
        let page = pages[0].as_ref().expect("page");
        assert_eq!(page.text, "new [[Y]]");
    }

    #[test]
    fn malformed_page_is_recoverable_and_reading_continues() {
        let xml = "<mediawiki>\
            <page><title>Bad</title><ns>zero</ns></page>\
            <page><ns>0</ns></page>\
            <page><title>Good</title><ns>0</ns></page></mediawiki>";
        let results = collect(xml, true);
        assert_eq!(results.len(), 3);

        let bad = results[0].as_ref().expect_err("bad ns");
        assert!(bad.is_recoverable());
        assert!(bad.to_string().contains("Bad"));
        let untitled = results[1].as_ref().expect_err("no title");
        assert!(untitled.is_recoverable());
        assert_eq!(results[2].as_ref().expect("good").title, "Good");
    }

    #[test]
    fn broken_xml_is_fatal_and_ends_iteration() {
        let xml = "<mediawiki><page><title>A</title><ns>0</ns></page><page><title>B</titl></page>";
        let results = collect(xml, true);
        assert!(results[0].is_ok());
        let last = results.last().expect("results");
        let error = last.as_ref().expect_err("must fail");
        assert!(!error.is_recoverable());
    }

    #[test]
    fn xml_dump_reads_file_twice() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("dump.xml");
        fs::write(&path, SAMPLE).expect("write dump");

        let dump = XmlDump::open(&path).expect("open");
        assert_eq!(dump.titles().expect("titles").count(), 3);
        assert_eq!(dump.pages().expect("pages").count(), 3);
    }

    #[test]
    fn missing_dump_file_is_an_open_error() {
        let error = XmlDump::open(Path::new("/nonexistent/dump.xml")).expect_err("must fail");
        assert!(matches!(error, DumpError::Open { .. }));
        assert!(!error.is_recoverable());
    }
}
