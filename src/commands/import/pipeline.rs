use super::*;

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Used only when the version does not exist yet.
    pub abbreviation: Option<String>,
    pub source_sha256: Option<String>,
    /// Checked between verses; committed work stays in place when set.
    pub cancel: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub version: VersionSummary,
    pub counts: ImportCounts,
    pub coverage: BookCoverage,
    pub fts_rebuilt: bool,
    pub cancelled: bool,
    pub warnings: Vec<String>,
}

/// Per-verse results, merged into the run counters only after the verse's
/// savepoint commits.
#[derive(Debug, Default)]
struct VerseDelta {
    inserted: bool,
    has_break: bool,
    end_missing: bool,
    end_nested: bool,
    synthetic_line: bool,
    structure: StructureCounts,
    coerced_titles: Vec<String>,
    chapter_titles: Vec<NodeId>,
}

/// A chapter row opened during the current book.
#[derive(Debug, Clone, Copy)]
struct OpenChapter {
    id: i64,
    titles: u32,
}

struct ImportRun<'a> {
    doc: &'a Document,
    extractor: StructuralExtractor,
    version_id: i64,
    cancel: Option<Arc<AtomicBool>>,
    paragraphs: ParagraphState,
    counts: ImportCounts,
    warnings: Vec<String>,
}

/// Import one parsed OSIS document into the store.
///
/// Books are imported in document order, each inside its own transaction,
/// and every verse inside a savepoint so a failing verse is rolled back and
/// counted without touching its neighbours.
pub fn import_document(
    connection: &mut Connection,
    doc: &Document,
    options: &ImportOptions,
) -> Result<ImportOutcome> {
    let info = version_info(doc, options)?;
    let version = find_or_create_version(connection, &info)?;
    info!(
        version_id = version.id,
        work = %version.osis_work,
        abbreviation = %version.abbreviation,
        reused = version.reused,
        "resolved bible version"
    );

    let books = load_books(connection)?;
    if books.is_empty() {
        bail!("books table is empty; run `init` before importing");
    }

    let book_nodes = doc
        .elements("div")
        .filter(|id| doc.attr(*id, "type") == Some("book"))
        .filter_map(|id| doc.attr(id, "osisID").map(|osis_id| (id, osis_id.trim())))
        .collect::<Vec<(NodeId, &str)>>();

    let mut run = ImportRun {
        doc,
        extractor: StructuralExtractor::new()?,
        version_id: version.id,
        cancel: options.cancel.clone(),
        paragraphs: ParagraphState::default(),
        counts: ImportCounts {
            books_in_document: book_nodes.len(),
            ..ImportCounts::default()
        },
        warnings: Vec::new(),
    };

    let coverage = book_coverage(connection, &books, &book_nodes)?;
    for missing in &coverage.missing_from_schema {
        warn!(book = %missing, "book not present in books table; skipping");
        run.warnings
            .push(format!("book {missing} is not in the books table and was skipped"));
    }

    let mut cancelled = false;
    for (book_node, book_osis) in &book_nodes {
        let Some(book) = books.get(*book_osis).copied() else {
            run.counts.books_skipped += 1;
            continue;
        };
        if run.import_book(connection, *book_node, book_osis, book)? {
            cancelled = true;
            break;
        }
        run.counts.books_imported += 1;
    }

    if cancelled {
        warn!("import cancelled; the open paragraph is left unpersisted");
        run.warnings
            .push("import cancelled before the end of the document".to_string());
    } else if let Some(span) = paragraph::finish(std::mem::take(&mut run.paragraphs)) {
        run.persist_paragraphs(connection, vec![span])?;
    }

    let fts_rebuilt = match rebuild_fts_index(connection) {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "full-text index rebuild failed");
            run.warnings.push(format!("full-text index rebuild failed: {err:#}"));
            false
        }
    };

    info!(
        books = run.counts.books_imported,
        verses_inserted = run.counts.verses_inserted,
        verses_updated = run.counts.verses_updated,
        verses_failed = run.counts.verses_failed,
        paragraphs = run.counts.paragraphs_inserted,
        "import finished"
    );

    Ok(ImportOutcome {
        version,
        counts: run.counts,
        coverage,
        fts_rebuilt,
        cancelled,
        warnings: run.warnings,
    })
}

fn version_info(doc: &Document, options: &ImportOptions) -> Result<VersionInfo> {
    let Some(osis_text) = doc.elements("osisText").next() else {
        bail!("document has no osisText element");
    };
    let Some(osis_work) = doc
        .attr(osis_text, "osisIDWork")
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        bail!("osisText is missing the osisIDWork attribute");
    };

    let work = doc
        .elements_within(osis_text, "work")
        .find(|id| doc.attr(*id, "osisWork") == Some(osis_work))
        .or_else(|| doc.elements_within(osis_text, "work").next());
    let child_text = |local: &str| {
        work.and_then(|id| doc.first_child_element(id, local))
            .map(|id| normalize_whitespace(&doc.text_content(id)))
            .filter(|value| !value.is_empty())
    };

    let abbreviation = options
        .abbreviation
        .clone()
        .unwrap_or_else(|| derive_abbreviation(osis_work));

    Ok(VersionInfo {
        osis_work: osis_work.to_string(),
        abbreviation,
        title: child_text("title"),
        description: child_text("description"),
        language: doc.attr(osis_text, "xml:lang").map(ToOwned::to_owned),
        source_sha256: options.source_sha256.clone(),
    })
}

/// `Bible.en.kjv` becomes `KJV`.
pub(super) fn derive_abbreviation(osis_work: &str) -> String {
    osis_work
        .rsplit('.')
        .next()
        .unwrap_or(osis_work)
        .to_uppercase()
}

fn book_coverage(
    connection: &Connection,
    books: &HashMap<String, BookRow>,
    book_nodes: &[(NodeId, &str)],
) -> Result<BookCoverage> {
    let in_document = book_nodes
        .iter()
        .map(|(_, osis_id)| *osis_id)
        .collect::<HashSet<&str>>();

    let mut missing_from_schema = Vec::new();
    let mut reported = HashSet::new();
    for (_, osis_id) in book_nodes {
        if !books.contains_key(*osis_id) && reported.insert(*osis_id) {
            missing_from_schema.push(osis_id.to_string());
        }
    }

    let absent_from_document = book_ids_in_order(connection)?
        .into_iter()
        .filter(|osis_id| !in_document.contains(osis_id.as_str()))
        .collect();

    Ok(BookCoverage {
        missing_from_schema,
        absent_from_document,
    })
}

/// First chapter element per chapter number inside a book, skipping
/// chapter end markers.
fn chapter_markers(doc: &Document, book_node: NodeId) -> HashMap<u32, NodeId> {
    let mut markers = HashMap::new();
    for id in doc.elements_within(book_node, "chapter") {
        if doc.attr(id, "eID").is_some() && doc.attr(id, "sID").is_none() {
            continue;
        }
        let chapter = doc
            .attr(id, "osisID")
            .and_then(parse_osis_ref)
            .and_then(|reference| reference.chapter);
        if let Some(chapter) = chapter {
            markers.entry(chapter).or_insert(id);
        }
    }
    markers
}

/// Titles between a chapter marker and the first verse of the chapter.
fn leading_chapter_titles(doc: &Document, chapter: NodeId) -> Vec<NodeId> {
    let mut titles = Vec::new();
    if doc.attr(chapter, "sID").is_some() || doc.children(chapter).is_empty() {
        collect_leading_titles(doc, doc.following_siblings(chapter), &mut titles);
    } else {
        collect_leading_titles(doc, doc.children(chapter).iter().copied(), &mut titles);
    }
    titles
}

/// Returns true once the first verse start (or another chapter) is reached.
fn collect_leading_titles(
    doc: &Document,
    nodes: impl Iterator<Item = NodeId>,
    titles: &mut Vec<NodeId>,
) -> bool {
    for id in nodes {
        if doc.element(id).is_none() {
            continue;
        }
        if is_verse_start(doc, id) || doc.is_element(id, "chapter") {
            return true;
        }
        if doc.is_element(id, "title") {
            titles.push(id);
            continue;
        }
        if doc.descendants(id).any(|inner| is_verse_start(doc, inner)) {
            collect_leading_titles(doc, doc.children(id).iter().copied(), titles);
            return true;
        }
        titles.extend(
            doc.descendants(id)
                .filter(|inner| doc.is_element(*inner, "title")),
        );
    }
    false
}

/// Titles directly in front of a verse start marker, in document order.
fn leading_verse_titles(doc: &Document, start: NodeId) -> Vec<NodeId> {
    let mut titles = doc
        .preceding_siblings(start)
        .take_while(|id| {
            doc.is_element(*id, "title")
                || doc.text(*id).is_some_and(|text| text.trim().is_empty())
        })
        .filter(|id| doc.is_element(*id, "title"))
        .collect::<Vec<NodeId>>();
    titles.reverse();
    titles
}

/// Titles between the previous verse's end marker and `start`. Empty when
/// other content sits in between, since an unterminated previous verse
/// already covers it.
fn titles_after_previous_verse(doc: &Document, start: NodeId) -> Vec<NodeId> {
    let mut titles = Vec::new();
    for id in doc.preceding_siblings(start) {
        if doc.is_element(id, "title") {
            titles.push(id);
        } else if doc.is_element(id, "verse") && doc.attr(id, "eID").is_some() {
            break;
        } else if !doc.text(id).is_some_and(|text| text.trim().is_empty()) {
            return Vec::new();
        }
    }
    titles.reverse();
    titles
}

impl ImportRun<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Returns true when the run was cancelled inside this book.
    fn import_book(
        &mut self,
        connection: &mut Connection,
        book_node: NodeId,
        book_osis: &str,
        book: BookRow,
    ) -> Result<bool> {
        let doc = self.doc;
        let chapter_nodes = chapter_markers(doc, book_node);
        let verse_starts = doc
            .elements_within(book_node, "verse")
            .filter(|id| is_verse_start(doc, *id))
            .collect::<Vec<NodeId>>();

        let mut chapters: HashMap<u32, OpenChapter> = HashMap::new();
        let mut attached_titles: HashSet<NodeId> = HashSet::new();
        let mut cancelled = false;

        let mut tx = connection
            .transaction()
            .with_context(|| format!("failed to open transaction for {book_osis}"))?;

        for start in verse_starts {
            if self.is_cancelled() {
                cancelled = true;
                break;
            }
            self.counts.verses_seen += 1;

            let osis_id = doc
                .attr(start, "osisID")
                .or_else(|| doc.attr(start, "sID"))
                .unwrap_or_default()
                .trim()
                .to_string();
            let Some((chapter_number, verse_number)) = parse_osis_ref(&osis_id)
                .and_then(|reference| Some((reference.chapter?, reference.verse?)))
            else {
                warn!(verse = %osis_id, "verse osisID has no chapter/verse numbers; skipping");
                self.counts.verses_failed += 1;
                self.warnings
                    .push(format!("verse {osis_id}: unparseable osisID"));
                continue;
            };

            let chapter = match chapters.get(&chapter_number) {
                Some(chapter) => *chapter,
                None => {
                    let chapter = self.open_chapter(
                        &tx,
                        book,
                        book_osis,
                        chapter_number,
                        chapter_nodes.get(&chapter_number).copied(),
                        &mut attached_titles,
                    )?;
                    chapters.insert(chapter_number, chapter);
                    chapter
                }
            };

            let result = {
                let savepoint = tx.savepoint()?;
                let result = self.import_verse(
                    &savepoint,
                    start,
                    &osis_id,
                    chapter,
                    verse_number,
                    book,
                    &attached_titles,
                );
                if result.is_ok() {
                    savepoint.commit()?;
                }
                result
            };

            match result {
                Ok(delta) => {
                    let has_break = delta.has_break;
                    attached_titles.extend(delta.chapter_titles.iter().copied());
                    if let Some(open) = chapters.get_mut(&chapter_number) {
                        open.titles += delta.chapter_titles.len() as u32;
                    }
                    self.record_verse(&osis_id, delta);

                    let (next, closed) = paragraph::step(
                        std::mem::take(&mut self.paragraphs),
                        chapter.id,
                        verse_number,
                        has_break,
                    );
                    self.paragraphs = next;
                    self.persist_paragraphs(&tx, closed)?;
                }
                Err(err) => {
                    warn!(verse = %osis_id, error = %format!("{err:#}"), "verse import failed");
                    self.counts.verses_failed += 1;
                    self.warnings.push(format!("verse {osis_id}: {err:#}"));
                }
            }
        }

        tx.commit()
            .with_context(|| format!("failed to commit {book_osis}"))?;
        debug!(
            book = %book_osis,
            chapters = chapters.len(),
            cancelled,
            "book imported"
        );
        Ok(cancelled)
    }

    fn open_chapter(
        &mut self,
        connection: &Connection,
        book: BookRow,
        book_osis: &str,
        chapter_number: u32,
        marker: Option<NodeId>,
        attached_titles: &mut HashSet<NodeId>,
    ) -> Result<OpenChapter> {
        let doc = self.doc;
        let osis_id = format!("{book_osis}.{chapter_number}");
        let chapter_title = marker
            .and_then(|id| doc.attr(id, "chapterTitle"))
            .map(normalize_whitespace)
            .filter(|value| !value.is_empty());

        let (chapter_id, created) = find_or_create_chapter(
            connection,
            book.id,
            self.version_id,
            chapter_number,
            &osis_id,
            chapter_title.as_deref(),
        )?;
        if created {
            self.counts.chapters_inserted += 1;
        } else {
            self.counts.chapters_reused += 1;
            clear_chapter_titles(connection, chapter_id)?;
        }

        let mut titles = 0;
        if let Some(marker) = marker {
            for id in leading_chapter_titles(doc, marker) {
                titles += 1;
                let record = title_record(doc, id, NodeId::MAX, titles);
                self.note_coerced(&osis_id, &record);
                insert_title(connection, TitleOwner::Chapter(chapter_id), &record)?;
                attached_titles.insert(id);
                self.counts.chapter_titles_inserted += 1;
            }
        }

        debug!(chapter = %osis_id, chapter_id, created, titles, "chapter ready");
        Ok(OpenChapter {
            id: chapter_id,
            titles,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn import_verse(
        &self,
        connection: &Connection,
        start: NodeId,
        osis_id: &str,
        chapter: OpenChapter,
        verse_number: u32,
        book: BookRow,
        attached_titles: &HashSet<NodeId>,
    ) -> Result<VerseDelta> {
        let doc = self.doc;
        let span = resolve_verse(doc, start);
        let markup = span.markup(doc);
        let rendered =
            render_verse(&markup).with_context(|| format!("failed to render {osis_id}"))?;

        let (verse_id, inserted) = upsert_verse(
            connection,
            chapter.id,
            verse_number,
            osis_id,
            &rendered.text,
            &rendered.html,
            &markup,
        )?;
        if !inserted {
            clear_verse_structure(connection, verse_id)?;
        }

        // Titles between the previous verse and this one belong to this verse;
        // in front of verse 1 they belong to the chapter.
        let between_titles = if verse_number == 1 {
            Vec::new()
        } else {
            titles_after_previous_verse(doc, start)
                .into_iter()
                .filter(|id| !attached_titles.contains(id))
                .collect::<Vec<NodeId>>()
        };
        if !between_titles.is_empty() {
            debug!(verse = %osis_id, titles = between_titles.len(), "titles before verse attached");
        }
        let mut structure = self
            .extractor
            .extract(doc, &span, &between_titles)
            .with_context(|| format!("failed to extract structure of {osis_id}"))?;
        let synthetic_line = book.is_poetic && !structure.has_poetry();
        if synthetic_line {
            structure.add_synthetic_line(&rendered.text);
        }
        let structure_counts = insert_structure(connection, verse_id, &structure)?;

        let mut coerced_titles = structure
            .coerced_titles()
            .filter_map(|title| title.coerced_from.clone())
            .collect::<Vec<String>>();

        let mut chapter_titles = Vec::new();
        if verse_number == 1 {
            for id in leading_verse_titles(doc, start) {
                if attached_titles.contains(&id) {
                    continue;
                }
                let position = chapter.titles + chapter_titles.len() as u32 + 1;
                let record = title_record(doc, id, NodeId::MAX, position);
                coerced_titles.extend(record.coerced_from.clone());
                insert_title(connection, TitleOwner::Chapter(chapter.id), &record)?;
                chapter_titles.push(id);
            }
        }

        Ok(VerseDelta {
            inserted,
            has_break: span_has_paragraph_break(doc, &span),
            end_missing: !span.closed,
            end_nested: span.end_nested,
            synthetic_line,
            structure: structure_counts,
            coerced_titles,
            chapter_titles,
        })
    }

    fn record_verse(&mut self, osis_id: &str, delta: VerseDelta) {
        let counts = &mut self.counts;
        if delta.inserted {
            counts.verses_inserted += 1;
        } else {
            counts.verses_updated += 1;
        }
        if delta.end_missing {
            counts.verses_without_end_marker += 1;
            warn!(verse = %osis_id, "verse end marker not found; stored partial content");
            self.warnings
                .push(format!("verse {osis_id}: end marker not found"));
        }
        if delta.end_nested {
            counts.verses_with_nested_end_marker += 1;
        }
        if delta.synthetic_line {
            counts.synthetic_poetry_lines += 1;
        }
        counts.words_inserted += delta.structure.words;
        counts.verse_titles_inserted += delta.structure.titles;
        counts.poetry_rows_inserted += delta.structure.poetry;
        counts.translator_changes_inserted += delta.structure.translator_changes;
        counts.red_letter_inserted += delta.structure.red_letters;
        counts.divine_names_inserted += delta.structure.divine_names;
        counts.study_notes_inserted += delta.structure.notes;
        counts.chapter_titles_inserted += delta.chapter_titles.len();

        for raw in delta.coerced_titles {
            counts.titles_coerced += 1;
            warn!(verse = %osis_id, title_type = %raw, "unknown title type coerced to main");
            self.warnings
                .push(format!("verse {osis_id}: title type '{raw}' coerced to main"));
        }
    }

    fn note_coerced(&mut self, owner: &str, record: &TitleRecord) {
        if let Some(raw) = &record.coerced_from {
            self.counts.titles_coerced += 1;
            warn!(chapter = %owner, title_type = %raw, "unknown title type coerced to main");
            self.warnings
                .push(format!("chapter {owner}: title type '{raw}' coerced to main"));
        }
    }

    fn persist_paragraphs(
        &mut self,
        connection: &Connection,
        spans: Vec<ParagraphSpan>,
    ) -> Result<()> {
        for span in spans {
            if persist_paragraph(connection, &span)? {
                self.counts.paragraphs_inserted += 1;
            } else {
                self.counts.paragraphs_existing += 1;
            }
        }
        Ok(())
    }
}
