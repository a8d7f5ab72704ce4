//! Unit-aware chunking for source code.
//!
//! Lines are matched against per-language patterns to find functions and
//! containers (classes, structs, traits, impls, modules, namespaces). The
//! extent of a unit is found by brace counting for C-family languages and by
//! indentation for Python. Import statements are pulled into a leading chunk
//! that lists the imported modules.
//!
//! A unit over budget is split: containers into a head chunk plus one chunk
//! per member, anything else into line windows that overlap by
//! `code_overlap_lines`.

use crate::config::ChunkingConfig;
use crate::model::{Chunk, ChunkMetadata, ChunkType, DocumentMetadata};
use crate::packing::pack_units;
use crate::source::SourceText;
use crate::tokens::estimate_tokens;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Python,
    Java,
    CSharp,
    Go,
    C,
    Cpp,
    Unknown,
}

impl Language {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "rust" | "rs" => Language::Rust,
            "javascript" | "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "typescript" | "ts" | "tsx" => Language::TypeScript,
            "python" | "py" => Language::Python,
            "java" => Language::Java,
            "csharp" | "c#" | "cs" => Language::CSharp,
            "go" | "golang" => Language::Go,
            "c" | "h" => Language::C,
            "cpp" | "c++" | "cc" | "cxx" | "hpp" | "hh" => Language::Cpp,
            _ => Language::Unknown,
        }
    }

    /// Language from the metadata's `language`, then its `format`, then the
    /// extension of its title.
    pub fn detect(metadata: &DocumentMetadata) -> Self {
        let from_title = Path::new(&metadata.title)
            .extension()
            .and_then(|e| e.to_str())
            .map(Language::from_name);
        [
            metadata.language.as_deref().map(Language::from_name),
            metadata.format.as_deref().map(Language::from_name),
            from_title,
        ]
        .into_iter()
        .flatten()
        .find(|language| *language != Language::Unknown)
        .unwrap_or(Language::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Java => "java",
            Language::CSharp => "csharp",
            Language::Go => "go",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Unknown => "unknown",
        }
    }

    fn uses_indentation(&self) -> bool {
        matches!(self, Language::Python)
    }

    fn string_quotes(&self) -> &'static [char] {
        match self {
            Language::Rust => &['"'],
            Language::JavaScript | Language::TypeScript => &['"', '\'', '`'],
            Language::Go => &['"', '\'', '`'],
            _ => &['"', '\''],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    Function,
    Container,
}

impl UnitKind {
    fn chunk_type(&self) -> ChunkType {
        match self {
            UnitKind::Function => ChunkType::Function,
            UnitKind::Container => ChunkType::Class,
        }
    }
}

/// Line patterns for one language. Unit patterns capture `name`; import
/// patterns capture `module`.
struct Grammar {
    functions: Vec<Regex>,
    containers: Vec<Regex>,
    /// Method declarations inside a container body
    members: Vec<Regex>,
    import_start: Option<Regex>,
    import_modules: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
}

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "return", "else", "do", "catch", "sizeof", "new", "delete",
    "case", "throw", "using", "typedef", "goto",
];

static GRAMMARS: LazyLock<HashMap<Language, Grammar>> = LazyLock::new(|| {
    let mut grammars = HashMap::new();

    grammars.insert(
        Language::Rust,
        Grammar {
            functions: compile(&[
                r#"^(?:pub(?:\([^)]*\))?\s+)?(?:default\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+(?P<name>\w+)"#,
                r"^macro_rules!\s*(?P<name>\w+)",
            ]),
            containers: compile(&[
                r"^(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?(?:struct|enum|union|trait|mod)\s+(?P<name>\w+)",
                r"^(?:unsafe\s+)?impl\b(?P<name>[^{]*)",
            ]),
            members: Vec::new(),
            import_start: Some(Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?use\s|^extern\s+crate\s").expect("valid regex")),
            import_modules: compile(&[
                r"\buse\s+(?P<module>[\w:]+)",
                r"^extern\s+crate\s+(?P<module>\w+)",
            ]),
        },
    );

    let js_functions = [
        r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>[\w$]+)",
        r"^(?:export\s+)?(?:const|let|var)\s+(?P<name>[\w$]+)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*(?::[^=]+)?=>|[\w$]+\s*=>)",
    ];
    let js_members = [
        r"^(?:(?:public|private|protected|static|async|readonly|override|get|set)\s+)*\*?(?P<name>[\w$]+)\s*\([^;]*\)\s*(?::[^{;]+)?\{\s*$",
    ];
    let js_import_start =
        r"^import\b|^(?:export\s+)?(?:const|let|var)\s+[^=]+=\s*require\(";
    let js_modules = [
        r#"\bfrom\s+['"](?P<module>[^'"]+)['"]"#,
        r#"^import\s+['"](?P<module>[^'"]+)['"]"#,
        r#"require\(\s*['"](?P<module>[^'"]+)['"]"#,
    ];
    grammars.insert(
        Language::JavaScript,
        Grammar {
            functions: compile(&js_functions),
            containers: compile(&[
                r"^(?:export\s+)?(?:default\s+)?class\s+(?P<name>[\w$]+)",
            ]),
            members: compile(&js_members),
            import_start: Some(Regex::new(js_import_start).expect("valid regex")),
            import_modules: compile(&js_modules),
        },
    );
    grammars.insert(
        Language::TypeScript,
        Grammar {
            functions: compile(&js_functions),
            containers: compile(&[
                r"^(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>[\w$]+)",
                r"^(?:export\s+)?(?:declare\s+)?(?:interface|enum|namespace|module)\s+(?P<name>[\w$.]+)",
            ]),
            members: compile(&js_members),
            import_start: Some(Regex::new(js_import_start).expect("valid regex")),
            import_modules: compile(&js_modules),
        },
    );

    grammars.insert(
        Language::Python,
        Grammar {
            functions: compile(&[r"^(?:async\s+)?def\s+(?P<name>\w+)"]),
            containers: compile(&[r"^class\s+(?P<name>\w+)"]),
            members: Vec::new(),
            import_start: Some(Regex::new(r"^(?:import|from)\s").expect("valid regex")),
            import_modules: compile(&[
                r"^from\s+(?P<module>[\w.]+)\s+import\b",
                r"^import\s+(?P<module>[\w.]+)",
            ]),
        },
    );

    let java_like_members = [
        r"^(?:@\w+\s+)*(?:(?:public|private|protected|internal|static|final|abstract|synchronized|native|override|virtual|async|sealed|extern|unsafe|default)\s+)*(?:<[^>]+>\s+)?[\w<>\[\],.?]+\s+(?P<name>\w+)\s*\([^;]*$",
        r"^(?:(?:public|private|protected|internal)\s+)(?P<name>\w+)\s*\([^;]*$",
    ];
    grammars.insert(
        Language::Java,
        Grammar {
            functions: Vec::new(),
            containers: compile(&[
                r"^(?:(?:public|private|protected|static|abstract|final|sealed|non-sealed|strictfp)\s+)*(?:class|interface|enum|record|@interface)\s+(?P<name>\w+)",
            ]),
            members: compile(&java_like_members),
            import_start: Some(Regex::new(r"^import\s").expect("valid regex")),
            import_modules: compile(&[r"^import\s+(?:static\s+)?(?P<module>[\w.*]+)"]),
        },
    );
    grammars.insert(
        Language::CSharp,
        Grammar {
            functions: Vec::new(),
            containers: compile(&[
                r"^(?:(?:public|private|protected|internal|static|abstract|sealed|partial|readonly|unsafe|file)\s+)*(?:class|interface|enum|struct|record|namespace)\s+(?P<name>[\w.]+)",
            ]),
            members: compile(&java_like_members),
            import_start: Some(Regex::new(r"^using\s+(?:static\s+)?[\w.]+\s*;").expect("valid regex")),
            import_modules: compile(&[r"^using\s+(?:static\s+)?(?P<module>[\w.]+)\s*;"]),
        },
    );

    grammars.insert(
        Language::Go,
        Grammar {
            functions: compile(&[r"^func\s+(?:\([^)]*\)\s*)?(?P<name>\w+)"]),
            containers: compile(&[r"^type\s+(?P<name>\w+)\s+(?:struct|interface)\b"]),
            members: Vec::new(),
            import_start: Some(Regex::new(r"^import\b").expect("valid regex")),
            import_modules: compile(&[r#""(?P<module>[^"]+)""#]),
        },
    );

    let c_function = r"^(?:(?:static|inline|extern|const|unsigned|signed|struct|enum|volatile|virtual|constexpr)\s+)*[A-Za-z_][\w:<>,]*(?:\s*[\*&]+\s*|\s+)[\*&]*(?P<name>[A-Za-z_~][\w:~]*)\s*\([^;]*$";
    grammars.insert(
        Language::C,
        Grammar {
            functions: compile(&[c_function]),
            containers: compile(&[
                r"^(?:typedef\s+)?(?:struct|union|enum)\s+(?P<name>\w+)\s*\{?\s*$",
            ]),
            members: Vec::new(),
            import_start: Some(Regex::new(r"^#\s*include\b").expect("valid regex")),
            import_modules: compile(&[r#"^#\s*include\s*[<"](?P<module>[^>"]+)[>"]"#]),
        },
    );
    grammars.insert(
        Language::Cpp,
        Grammar {
            functions: compile(&[c_function]),
            containers: compile(&[
                r"^(?:template\s*<[^>]*>\s*)?(?:class|struct|union|namespace|enum(?:\s+class)?)\s+(?P<name>\w+)[^;]*$",
            ]),
            members: compile(&[c_function]),
            import_start: Some(Regex::new(r"^#\s*include\b").expect("valid regex")),
            import_modules: compile(&[r#"^#\s*include\s*[<"](?P<module>[^>"]+)[>"]"#]),
        },
    );

    grammars
});

/// A function or container found in the source. Lines are 0-based, inclusive.
#[derive(Debug, Clone)]
struct Unit {
    kind: UnitKind,
    name: String,
    /// First line including attached comments and attributes
    start: usize,
    /// Line that matched the unit pattern
    header: usize,
    end: usize,
}

#[derive(Debug)]
enum Item {
    Gap(usize, usize),
    Unit(Unit),
}

#[derive(Debug)]
struct ImportStatement {
    first: usize,
    last: usize,
    modules: Vec<String>,
}

/// Chunks source code along function and class boundaries.
#[derive(Debug, Clone)]
pub struct CodeStrategy {
    config: ChunkingConfig,
}

struct Document<'a> {
    source: SourceText<'a>,
    lines: Vec<&'a str>,
    language: Language,
    metadata: &'a DocumentMetadata,
}

impl<'a> Document<'a> {
    fn new(content: &'a str, metadata: &'a DocumentMetadata, language: Language) -> Self {
        let source = SourceText::new(content);
        let lines = (0..source.line_count())
            .map(|i| source.slice(source.line_range(i)))
            .collect();
        Self {
            source,
            lines,
            language,
            metadata,
        }
    }

    fn grammar(&self) -> Option<&'static Grammar> {
        GRAMMARS.get(&self.language)
    }

    fn chunk(&self, range_lines: (usize, usize), chunk_type: ChunkType) -> Chunk {
        let range = self.source.lines_range(range_lines.0, range_lines.1);
        let range = self.source.trim(range);
        Chunk::new(
            &self.metadata.id,
            self.source.slice(range.clone()),
            chunk_type,
            self.source.position(range),
        )
    }

    fn base_metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            language: (self.language != Language::Unknown)
                .then(|| self.language.as_str().to_string()),
            ..ChunkMetadata::default()
        }
    }
}

impl CodeStrategy {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn chunk(&self, content: &str, metadata: &DocumentMetadata) -> Vec<Chunk> {
        let language = Language::detect(metadata);
        let doc = Document::new(content, metadata, language);
        if doc.lines.iter().all(|l| l.trim().is_empty()) {
            return Vec::new();
        }

        tracing::debug!("Chunking {} code document {}", language.as_str(), metadata.id);
        if doc.grammar().is_none() {
            return self.fixed_blocks(&doc);
        }

        let (imports, items) = scan(&doc);
        let mut chunks = self.import_chunks(&doc, &imports);
        for item in items {
            match item {
                Item::Gap(first, last) => {
                    chunks.extend(self.line_chunks(&doc, first, last, ChunkType::CodeBlock, None, 0))
                }
                Item::Unit(unit) => self.emit_unit(&doc, &unit, &mut chunks),
            }
        }
        chunks
    }

    /// Fixed-size line blocks for languages without a grammar.
    fn fixed_blocks(&self, doc: &Document<'_>) -> Vec<Chunk> {
        let block = self.config.code_block_lines.max(1);
        let mut chunks = Vec::new();
        let mut first = 0;
        while first < doc.lines.len() {
            let last = (first + block - 1).min(doc.lines.len() - 1);
            chunks.extend(self.line_chunks(doc, first, last, ChunkType::CodeBlock, None, 0));
            first = last + 1;
        }
        chunks
    }

    /// Pack lines `first..=last` into chunks of `chunk_type`, skipping blank lines.
    fn line_chunks(
        &self,
        doc: &Document<'_>,
        first: usize,
        last: usize,
        chunk_type: ChunkType,
        name: Option<&str>,
        overlap: usize,
    ) -> Vec<Chunk> {
        let span = doc.source.lines_range(first, last);
        let lines = doc.source.lines(span);
        pack_units(doc.source.text(), &lines, self.config.budget(), overlap)
            .into_iter()
            .map(|packed| {
                Chunk::new(
                    &doc.metadata.id,
                    doc.source.slice(packed.range.clone()),
                    chunk_type,
                    doc.source.position(packed.range),
                )
                .with_metadata(ChunkMetadata {
                    name: name.map(str::to_string),
                    oversized: packed.oversized,
                    importance: if chunk_type == ChunkType::CodeBlock { 0.4 } else { 0.6 },
                    ..doc.base_metadata()
                })
            })
            .collect()
    }

    /// Group import statements into leading chunks that list their modules.
    fn import_chunks(&self, doc: &Document<'_>, imports: &[ImportStatement]) -> Vec<Chunk> {
        let budget = self.config.budget();
        let mut chunks = Vec::new();
        let mut group: Vec<&ImportStatement> = Vec::new();

        let flush = |group: &mut Vec<&ImportStatement>, chunks: &mut Vec<Chunk>| {
            let (Some(first), Some(last)) = (group.first(), group.last()) else {
                return;
            };
            let content = import_text(doc, group);
            let range = doc.source.lines_range(first.first, last.last);
            let mut modules: Vec<String> = Vec::new();
            for statement in group.iter() {
                for module in &statement.modules {
                    if !modules.contains(module) {
                        modules.push(module.clone());
                    }
                }
            }
            let oversized = group.len() == 1 && estimate_tokens(&content) > budget;
            chunks.push(
                Chunk::new(
                    &doc.metadata.id,
                    content,
                    ChunkType::CodeBlock,
                    doc.source.position(range),
                )
                .with_metadata(ChunkMetadata {
                    importance: 0.6,
                    name: Some("imports".to_string()),
                    dependencies: modules,
                    oversized,
                    ..doc.base_metadata()
                }),
            );
            group.clear();
        };

        for statement in imports {
            group.push(statement);
            if group.len() > 1 && estimate_tokens(&import_text(doc, &group)) > budget {
                group.pop();
                flush(&mut group, &mut chunks);
                group.push(statement);
            }
        }
        flush(&mut group, &mut chunks);
        chunks
    }

    fn emit_unit(&self, doc: &Document<'_>, unit: &Unit, chunks: &mut Vec<Chunk>) {
        let chunk_type = unit.kind.chunk_type();
        let header = doc.lines[unit.header].trim_start();
        let exported = ["pub", "export", "public"]
            .iter()
            .any(|kw| header.starts_with(kw));
        let importance = match unit.kind {
            UnitKind::Container => 0.8,
            UnitKind::Function => 0.7,
        } + if exported { 0.1 } else { 0.0 };

        let metadata = ChunkMetadata {
            importance,
            name: Some(unit.name.clone()),
            scope_end: Some(unit.end + 1),
            ..doc.base_metadata()
        };

        let whole = doc.chunk((unit.start, unit.end), chunk_type);
        if whole.tokens <= self.config.budget() {
            chunks.push(whole.with_metadata(metadata));
            return;
        }

        if unit.kind == UnitKind::Container {
            let members = find_members(doc, unit);
            if !members.is_empty() {
                self.emit_container(doc, unit, &members, metadata, chunks);
                return;
            }
        }

        // Line windows; the first carries the scope so later windows nest under it.
        let mut parts = self.line_chunks(
            doc,
            unit.start,
            unit.end,
            chunk_type,
            Some(&unit.name),
            self.config.code_overlap_lines,
        );
        if let Some(first) = parts.first_mut() {
            first.metadata = ChunkMetadata {
                contains_key_info: true,
                oversized: first.metadata.oversized,
                ..metadata
            };
        }
        chunks.extend(parts);
    }

    fn emit_container(
        &self,
        doc: &Document<'_>,
        unit: &Unit,
        members: &[Unit],
        metadata: ChunkMetadata,
        chunks: &mut Vec<Chunk>,
    ) {
        let mut cursor = unit.start;
        let mut head_emitted = false;
        let mut runs: Vec<Item> = Vec::new();
        for member in members {
            if member.start > cursor {
                runs.push(Item::Gap(cursor, member.start - 1));
            }
            runs.push(Item::Unit(member.clone()));
            cursor = member.end + 1;
        }
        if cursor <= unit.end {
            runs.push(Item::Gap(cursor, unit.end));
        }

        for run in runs {
            match run {
                Item::Unit(member) => self.emit_unit(doc, &member, chunks),
                Item::Gap(first, last) if !head_emitted => {
                    head_emitted = true;
                    let mut parts =
                        self.line_chunks(doc, first, last, ChunkType::CodeBlock, Some(&unit.name), 0);
                    if let Some(head) = parts.first_mut() {
                        head.chunk_type = ChunkType::Class;
                        head.metadata = ChunkMetadata {
                            oversized: head.metadata.oversized,
                            ..metadata.clone()
                        };
                    }
                    chunks.extend(parts);
                }
                Item::Gap(first, last) => chunks.extend(self.line_chunks(
                    doc,
                    first,
                    last,
                    ChunkType::CodeBlock,
                    Some(&unit.name),
                    0,
                )),
            }
        }
    }
}

fn import_text(doc: &Document<'_>, group: &[&ImportStatement]) -> String {
    group
        .iter()
        .flat_map(|s| doc.lines[s.first..=s.last].iter().map(|l| l.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Comment, doc-comment, attribute and decorator lines attach to the unit below.
fn is_attachable(line: &str, language: Language) -> bool {
    let trimmed = line.trim_start();
    if trimmed.is_empty() {
        return false;
    }
    match language {
        Language::Python => trimmed.starts_with('@') || trimmed.starts_with('#'),
        _ => {
            trimmed.starts_with("//")
                || trimmed.starts_with("/*")
                || trimmed.starts_with('*')
                || trimmed.starts_with("#[")
                || trimmed.starts_with('@')
                || (language == Language::CSharp && trimmed.starts_with('['))
        }
    }
}

fn match_name(patterns: &[Regex], line: &str) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        pattern
            .captures(line)
            .and_then(|caps| caps.name("name"))
            .map(|m| m.as_str().trim().to_string())
    })
}

fn match_unit(doc: &Document<'_>, line: &str) -> Option<(UnitKind, String)> {
    let grammar = doc.grammar()?;
    if let Some(name) = match_name(&grammar.containers, line) {
        return Some((UnitKind::Container, clean_name(&name)));
    }
    let name = match_name(&grammar.functions, line)?;
    let first_word = line.split(|c: char| !c.is_alphanumeric() && c != '_').next();
    if first_word.is_some_and(|w| CONTROL_KEYWORDS.contains(&w)) || CONTROL_KEYWORDS.contains(&name.as_str()) {
        return None;
    }
    Some((UnitKind::Function, name))
}

/// Tidy a captured name: strip a leading generic list and trailing `{`.
fn clean_name(name: &str) -> String {
    let mut name = name.trim();
    if name.starts_with('<') {
        let mut depth = 0;
        for (i, c) in name.char_indices() {
            match c {
                '<' => depth += 1,
                '>' => {
                    depth -= 1;
                    if depth == 0 {
                        name = name[i + 1..].trim_start();
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    let name = name.trim_end_matches('{').trim();
    match name.find(" where") {
        Some(i) => name[..i].trim().to_string(),
        None => name.to_string(),
    }
}

/// Import statement starting at `line`, if there is one.
fn match_import(doc: &Document<'_>, line: usize) -> Option<ImportStatement> {
    let grammar = doc.grammar()?;
    let text = doc.lines[line].trim_start();
    if !grammar.import_start.as_ref()?.is_match(text) {
        return None;
    }

    let last = import_end(doc, line);
    let statement = doc.lines[line..=last]
        .iter()
        .map(|l| l.trim())
        .collect::<Vec<_>>()
        .join("\n");

    let mut modules = Vec::new();
    let mut push = |module: &str| {
        let module = module.trim_end_matches("::").to_string();
        if !module.is_empty() && !modules.contains(&module) {
            modules.push(module);
        }
    };
    for statement_line in statement.lines() {
        for pattern in &grammar.import_modules {
            for caps in pattern.captures_iter(statement_line) {
                if let Some(m) = caps.name("module") {
                    push(m.as_str());
                }
            }
        }
    }
    // `import a, b` in Python names several modules on one line.
    if doc.language == Language::Python && text.starts_with("import ") {
        for module in text["import ".len()..].split(',') {
            if let Some(name) = module.split_whitespace().next() {
                push(name);
            }
        }
    }

    Some(ImportStatement {
        first: line,
        last,
        modules,
    })
}

/// Last line of a possibly multi-line import statement.
fn import_end(doc: &Document<'_>, line: usize) -> usize {
    const MAX_IMPORT_LINES: usize = 200;
    let text = doc.lines[line].trim();
    let limit = (line + MAX_IMPORT_LINES).min(doc.lines.len() - 1);
    let find_from = |predicate: &dyn Fn(&str) -> bool| {
        (line..=limit)
            .find(|&i| predicate(doc.lines[i]))
            .unwrap_or(line)
    };

    match doc.language {
        Language::Go if text.ends_with('(') => find_from(&|l: &str| l.trim() == ")"),
        Language::Python if text.contains('(') && !text.contains(')') => {
            find_from(&|l: &str| l.contains(')'))
        }
        Language::Python => {
            let mut last = line;
            while last < limit && doc.lines[last].trim_end().ends_with('\\') {
                last += 1;
            }
            last
        }
        Language::Rust | Language::Java | Language::CSharp => find_from(&|l: &str| l.contains(';')),
        Language::JavaScript | Language::TypeScript => {
            if text.contains('{') && !text.contains('}') {
                find_from(&|l: &str| l.contains('}'))
            } else {
                line
            }
        }
        _ => line,
    }
}

/// Split the document into import statements and an ordered list of units
/// and gap line runs.
fn scan(doc: &Document<'_>) -> (Vec<ImportStatement>, Vec<Item>) {
    let mut imports = Vec::new();
    let mut items = Vec::new();
    let mut gap: Vec<usize> = Vec::new();

    let flush_gap = |gap: &mut Vec<usize>, items: &mut Vec<Item>| {
        let mut run: Option<(usize, usize)> = None;
        for &line in gap.iter() {
            run = match run {
                Some((first, last)) if last + 1 == line => Some((first, line)),
                Some((first, last)) => {
                    push_gap(doc, first, last, items);
                    Some((line, line))
                }
                None => Some((line, line)),
            };
        }
        if let Some((first, last)) = run {
            push_gap(doc, first, last, items);
        }
        gap.clear();
    };

    let mut line = 0;
    while line < doc.lines.len() {
        let text = doc.lines[line];
        let trimmed = text.trim_start();
        if trimmed.is_empty() {
            gap.push(line);
            line += 1;
            continue;
        }

        if let Some(statement) = match_import(doc, line) {
            line = statement.last + 1;
            imports.push(statement);
            continue;
        }

        let top_level = !doc.language.uses_indentation() || indent_of(text) == 0;
        let unit = top_level.then(|| match_unit(doc, trimmed)).flatten();
        let Some((kind, name)) = unit else {
            gap.push(line);
            line += 1;
            continue;
        };

        let end = block_end(doc, line);
        if end == line && trimmed.trim_end().ends_with(';') {
            gap.push(line);
            line += 1;
            continue;
        }

        let mut start = line;
        while let Some(&previous) = gap.last() {
            if previous + 1 == start && is_attachable(doc.lines[previous], doc.language) {
                start = previous;
                gap.pop();
            } else {
                break;
            }
        }
        flush_gap(&mut gap, &mut items);
        items.push(Item::Unit(Unit {
            kind,
            name,
            start,
            header: line,
            end,
        }));
        line = end + 1;
    }
    flush_gap(&mut gap, &mut items);
    (imports, items)
}

fn push_gap(doc: &Document<'_>, first: usize, last: usize, items: &mut Vec<Item>) {
    if doc.lines[first..=last].iter().any(|l| !l.trim().is_empty()) {
        items.push(Item::Gap(first, last));
    }
}

/// Last line of the unit whose header is on `start`.
fn block_end(doc: &Document<'_>, start: usize) -> usize {
    if doc.language.uses_indentation() {
        indent_block_end(&doc.lines, start)
    } else {
        brace_block_end(&doc.lines, start, doc.language)
    }
}

/// Scan from `start` counting braces outside strings and comments. The block
/// ends where depth returns to zero, or at a `;` seen before any `{`.
fn brace_block_end(lines: &[&str], start: usize, language: Language) -> usize {
    let quotes = language.string_quotes();
    let mut depth: i32 = 0;
    let mut opened = false;
    let mut in_block_comment = false;
    let mut in_string: Option<char> = None;

    for (index, line) in lines.iter().enumerate().skip(start) {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            if in_block_comment {
                if c == '*' && next == Some('/') {
                    in_block_comment = false;
                    i += 1;
                }
            } else if let Some(quote) = in_string {
                if c == '\\' {
                    i += 1;
                } else if c == quote {
                    in_string = None;
                }
            } else if c == '/' && next == Some('/') {
                break;
            } else if c == '/' && next == Some('*') {
                in_block_comment = true;
                i += 1;
            } else if c == '\'' && language == Language::Rust {
                // Char literals like '{' or '\n'; anything else is a lifetime.
                if next == Some('\\') {
                    if let Some(close) = chars[i + 2..].iter().position(|&ch| ch == '\'') {
                        i += close + 2;
                    }
                } else if chars.get(i + 2) == Some(&'\'') {
                    i += 2;
                }
            } else if quotes.contains(&c) {
                in_string = Some(c);
            } else if c == '{' {
                depth += 1;
                opened = true;
            } else if c == '}' {
                depth -= 1;
                if opened && depth <= 0 {
                    return index;
                }
            } else if c == ';' && !opened && depth == 0 {
                return index;
            }
            i += 1;
        }
        // Only backtick strings span lines.
        if in_string.is_some_and(|q| q != '`') {
            in_string = None;
        }
    }
    lines.len().saturating_sub(1)
}

/// Python: the header runs until a line ending in `:` outside brackets; the
/// body is every following line indented deeper than the header.
fn indent_block_end(lines: &[&str], start: usize) -> usize {
    let base = indent_of(lines[start]);
    let mut header_end = start;
    let mut brackets: i32 = 0;
    loop {
        let code = lines[header_end].split('#').next().unwrap_or_default();
        for c in code.chars() {
            match c {
                '(' | '[' | '{' => brackets += 1,
                ')' | ']' | '}' => brackets -= 1,
                _ => {}
            }
        }
        if brackets <= 0 && code.trim_end().ends_with(':') {
            break;
        }
        if header_end + 1 >= lines.len() {
            return header_end;
        }
        header_end += 1;
    }

    let mut end = header_end;
    for (index, line) in lines.iter().enumerate().skip(header_end + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) > base {
            end = index;
        } else {
            break;
        }
    }
    end
}

/// Members (methods, nested types) directly inside a container body.
fn find_members(doc: &Document<'_>, unit: &Unit) -> Vec<Unit> {
    let Some(grammar) = doc.grammar() else {
        return Vec::new();
    };
    let body_start = if doc.language.uses_indentation() {
        // Python: the header may span lines; members sit one level deeper.
        (unit.header + 1..=unit.end)
            .find(|&i| indent_of(doc.lines[i]) > indent_of(doc.lines[unit.header]) && !doc.lines[i].trim().is_empty())
    } else {
        Some(unit.header + 1)
    };
    let Some(body_start) = body_start else {
        return Vec::new();
    };
    let member_indent = indent_of(doc.lines[body_start]);

    let mut members = Vec::new();
    let mut line = body_start;
    let mut attachable_from: Option<usize> = None;
    while line < unit.end {
        let text = doc.lines[line];
        let trimmed = text.trim_start();
        if trimmed.is_empty() {
            attachable_from = None;
            line += 1;
            continue;
        }
        if doc.language.uses_indentation() && indent_of(text) != member_indent {
            attachable_from = None;
            line += 1;
            continue;
        }

        let matched = match_unit(doc, trimmed).or_else(|| {
            match_name(&grammar.members, trimmed)
                .filter(|name| !CONTROL_KEYWORDS.contains(&name.as_str()))
                .map(|name| (UnitKind::Function, name))
        });
        let Some((kind, name)) = matched else {
            if is_attachable(text, doc.language) {
                attachable_from.get_or_insert(line);
            } else {
                attachable_from = None;
            }
            line += 1;
            continue;
        };

        let end = block_end(doc, line).min(unit.end);
        if end == line && trimmed.trim_end().ends_with(';') {
            attachable_from = None;
            line += 1;
            continue;
        }
        members.push(Unit {
            kind,
            name,
            start: attachable_from.take().unwrap_or(line),
            header: line,
            end,
        });
        line = end + 1;
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentType;

    fn metadata(title: &str) -> DocumentMetadata {
        DocumentMetadata::from_path("code-doc", Path::new(title))
    }

    fn types(chunks: &[Chunk]) -> Vec<ChunkType> {
        chunks.iter().map(|c| c.chunk_type).collect()
    }

    const RUST_SOURCE: &str = r#"use std::collections::HashMap;
use serde::{Deserialize, Serialize};

/// A parsed header.
#[derive(Debug)]
pub struct Header {
    name: String,
}

impl Header {
    pub fn new(name: &str) -> Self {
        let brace = '{';
        let text = "not a } brace";
        Self { name: name.to_string() }
    }
}

pub fn parse_header(line: &str) -> Option<Header> {
    // a stray } in a comment
    line.split_once(':').map(|(name, _)| Header::new(name))
}
"#;

    #[test]
    fn test_language_detection() {
        assert_eq!(Language::detect(&metadata("lib.rs")), Language::Rust);
        let meta = DocumentMetadata::new("x", "snippet", ContentType::Code).with_language("Python");
        assert_eq!(Language::detect(&meta), Language::Python);
        let meta = DocumentMetadata::new("x", "snippet", ContentType::Code).with_format("tsx");
        assert_eq!(Language::detect(&meta), Language::TypeScript);
        assert_eq!(Language::detect(&metadata("build.zig")), Language::Unknown);
    }

    #[test]
    fn test_rust_units_and_imports() {
        let strategy = CodeStrategy::new(ChunkingConfig::default());
        let chunks = strategy.chunk(RUST_SOURCE, &metadata("header.rs"));

        assert_eq!(
            types(&chunks),
            vec![
                ChunkType::CodeBlock,
                ChunkType::Class,
                ChunkType::Class,
                ChunkType::Function
            ]
        );
        assert_eq!(chunks[0].metadata.dependencies, vec!["std::collections::HashMap", "serde"]);
        assert_eq!(chunks[0].metadata.name.as_deref(), Some("imports"));
        assert!(chunks[1].content.starts_with("/// A parsed header."));
        assert_eq!(chunks[1].metadata.name.as_deref(), Some("Header"));
        assert_eq!(chunks[2].metadata.name.as_deref(), Some("Header"));
        assert!(chunks[2].content.trim_end().ends_with('}'));
        assert!(chunks[2].content.contains("Self { name"));
        assert_eq!(chunks[3].metadata.name.as_deref(), Some("parse_header"));
        assert_eq!(chunks[3].position.line_start, Some(18));
        assert_eq!(chunks[3].metadata.scope_end, Some(21));
        assert_eq!(chunks[3].metadata.language.as_deref(), Some("rust"));
    }

    #[test]
    fn test_oversized_function_is_split_with_overlap() {
        let body: String = (0..40)
            .map(|i| format!("    let value_{i} = compute({i});\n"))
            .collect();
        let source = format!("fn big() {{\n{body}}}\n");
        let config = ChunkingConfig::new(120);
        let strategy = CodeStrategy::new(config.clone());
        let chunks = strategy.chunk(&source, &metadata("big.rs"));

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chunk_type == ChunkType::Function));
        assert!(chunks.iter().all(|c| c.tokens <= 120));
        assert!(chunks[0].metadata.contains_key_info);
        assert_eq!(chunks[0].metadata.scope_end, Some(42));
        assert!(chunks[1].metadata.scope_end.is_none());

        // The last five lines of one window open the next.
        let first_lines: Vec<&str> = chunks[0].content.lines().collect();
        let tail = &first_lines[first_lines.len() - 5..];
        let second_lines: Vec<&str> = chunks[1].content.lines().collect();
        assert_eq!(&second_lines[..5], tail);
    }

    #[test]
    fn test_python_class_split_into_members() {
        let methods: String = (0..6)
            .map(|i| {
                format!(
                    "    @property\n    def method_{i}(self):\n        \"\"\"Return value {i}.\"\"\"\n        return self.values[{i}] * {i}\n\n"
                )
            })
            .collect();
        let source = format!(
            "import os, sys\nfrom typing import (\n    List,\n)\n\nclass Store:\n    kind = \"memory\"\n\n{methods}\ndef helper():\n    return 1\n"
        );
        let strategy = CodeStrategy::new(ChunkingConfig::new(60));
        let chunks = strategy.chunk(&source, &metadata("store.py"));

        assert_eq!(chunks[0].metadata.dependencies, vec!["os", "sys", "typing"]);
        assert_eq!(chunks[1].chunk_type, ChunkType::Class);
        assert!(chunks[1].content.starts_with("class Store:"));
        assert_eq!(chunks[1].metadata.scope_end, Some(37));

        let methods: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::Function)
            .collect();
        assert_eq!(methods.len(), 7);
        assert!(methods[0].content.starts_with("@property"));
        assert_eq!(methods[0].metadata.name.as_deref(), Some("method_0"));
        assert_eq!(methods[6].metadata.name.as_deref(), Some("helper"));
    }

    #[test]
    fn test_javascript_arrow_functions_and_require() {
        let source = "const fs = require('fs');\nimport { join } from 'path';\n\nexport const load = async (file) => {\n  return fs.readFileSync(join('.', file));\n};\n\nclass Cache {\n  get(key) {\n    return this.map[key];\n  }\n}\n";
        let strategy = CodeStrategy::new(ChunkingConfig::default());
        let chunks = strategy.chunk(source, &metadata("load.js"));

        assert_eq!(
            types(&chunks),
            vec![ChunkType::CodeBlock, ChunkType::Function, ChunkType::Class]
        );
        assert_eq!(chunks[0].metadata.dependencies, vec!["fs", "path"]);
        assert_eq!(chunks[1].metadata.name.as_deref(), Some("load"));
        assert_eq!(chunks[2].metadata.name.as_deref(), Some("Cache"));
    }

    #[test]
    fn test_unknown_language_uses_fixed_blocks() {
        let source: String = (0..120).map(|i| format!("line {i}\n")).collect();
        let strategy = CodeStrategy::new(ChunkingConfig::default());
        let chunks = strategy.chunk(&source, &metadata("script.zig"));

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chunk_type == ChunkType::CodeBlock));
        assert_eq!(chunks[1].position.line_start, Some(51));
        assert_eq!(chunks[2].position.line_end, Some(120));
        assert!(chunks[0].metadata.language.is_none());
    }

    #[test]
    fn test_brace_counting_skips_strings_and_comments() {
        let lines = vec![
            "fn tricky() {",
            "    let s = \"}}}\";",
            "    /* } */ let c = '}';",
            "    // }",
            "}",
            "fn after() {}",
        ];
        assert_eq!(brace_block_end(&lines, 0, Language::Rust), 4);
        assert_eq!(brace_block_end(&lines, 5, Language::Rust), 5);
    }

    #[test]
    fn test_declarations_stay_in_gaps() {
        let source = "mod generated;\n\nfn real() {\n    1\n}\n";
        let strategy = CodeStrategy::new(ChunkingConfig::default());
        let chunks = strategy.chunk(source, &metadata("lib.rs"));
        assert_eq!(types(&chunks), vec![ChunkType::CodeBlock, ChunkType::Function]);
        assert_eq!(chunks[0].content, "mod generated;");
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name(" Header {"), "Header");
        assert_eq!(clean_name("<T: Clone> Store<T> for Cache<T>"), "Store<T> for Cache<T>");
        assert_eq!(clean_name(" Foo where T: Send {"), "Foo");
    }
}
