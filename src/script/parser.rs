//! Parser for script files.
//!
//! Each line is tokenized on its own (a line is one token) and the block
//! tree is parsed from the token stream with [nom] combinators.

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::combinator::{all_consuming, value};
use nom::multi::{many0, many1};
use nom::sequence::pair;
use nom::IResult;

use super::blocks::{Block, BlockKind};
use super::lines::{BangLine, ClientLine, Line, ServerLine};
use crate::bolt::PackStreamVersion;
use crate::error::{StubError, StubResult};

/// What a script line is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Bang,
    Client,
    Server,
    Auto,
    AutoOptional,
    AutoRepeat0,
    AutoRepeat1,
    /// `{{`
    MultiOpen,
    /// `----`
    AlternativeSeparator,
    /// `++++`
    ParallelSeparator,
    /// `}}`
    MultiClose,
    OptionalOpen,
    OptionalClose,
    Repeat0Open,
    Repeat0Close,
    Repeat1Open,
    Repeat1Close,
}

/// A line that is nothing but a block delimiter.
fn parse_delimiter(i: &str) -> IResult<&str, TokenKind> {
    all_consuming(alt((
        value(TokenKind::MultiOpen, tag("{{")),
        value(TokenKind::AlternativeSeparator, tag("----")),
        value(TokenKind::ParallelSeparator, tag("++++")),
        value(TokenKind::MultiClose, tag("}}")),
        value(TokenKind::OptionalOpen, tag("{?")),
        value(TokenKind::OptionalClose, tag("?}")),
        value(TokenKind::Repeat0Open, tag("{*")),
        value(TokenKind::Repeat0Close, tag("*}")),
        value(TokenKind::Repeat1Open, tag("{+")),
        value(TokenKind::Repeat1Close, tag("+}")),
    )))(i)
}

/// A line prefix and whatever follows it.
fn parse_prefixed(i: &str) -> IResult<&str, (TokenKind, &str)> {
    pair(
        alt((
            value(TokenKind::Bang, tag("!:")),
            value(TokenKind::Client, tag("C:")),
            value(TokenKind::Server, tag("S:")),
            value(TokenKind::Auto, tag("A:")),
            value(TokenKind::AutoOptional, tag("?:")),
            value(TokenKind::AutoRepeat0, tag("*:")),
            value(TokenKind::AutoRepeat1, tag("+:")),
        )),
        nom::combinator::rest,
    )(i)
}

/// One script line with its meaning.
#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub line: Line,
}

/// Split script text into tokens, dropping blank lines and comments.
///
/// A line without a prefix continues the `C:` or `S:` lines before it.
pub(crate) fn tokenize(text: &str) -> StubResult<Vec<Token>> {
    let mut tokens: Vec<Token> = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let number = i + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Ok((_, kind)) = parse_delimiter(trimmed) {
            tokens.push(Token {
                kind,
                line: Line::new(number, trimmed, ""),
            });
            continue;
        }
        if let Ok((_, (kind, content))) = parse_prefixed(trimmed) {
            tokens.push(Token {
                kind,
                line: Line::new(number, trimmed, content.trim()),
            });
            continue;
        }
        if trimmed.starts_with("PY:") {
            return Err(StubError::Grammar(format!(
                "python lines are not supported: ({:3}) {}",
                number, trimmed
            )));
        }
        match tokens.last().map(|t| t.kind) {
            Some(kind @ (TokenKind::Client | TokenKind::Server)) => tokens.push(Token {
                kind,
                line: Line::new(number, trimmed, trimmed),
            }),
            _ => {
                return Err(StubError::Grammar(format!(
                    "unexpected line ({:3}) {}",
                    number, trimmed
                )))
            }
        }
    }
    Ok(tokens)
}

type NomResult<'t, O> = IResult<&'t [Token], O, NomError<'t>>;

#[derive(Debug)]
enum ErrorKind {
    /// The tokens form no valid block
    Grammar(StubError),
    /// error kind wrapped from native nom errors
    Nom(nom::error::ErrorKind),
}

#[derive(Debug)]
struct NomError<'t> {
    /// Tokens left when the error happened
    input: &'t [Token],
    code: ErrorKind,
}

impl<'t> nom::error::ParseError<&'t [Token]> for NomError<'t> {
    fn from_error_kind(input: &'t [Token], kind: nom::error::ErrorKind) -> Self {
        Self {
            input,
            code: ErrorKind::Nom(kind),
        }
    }

    fn append(_input: &'t [Token], _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

impl NomError<'_> {
    fn into_stub_error(self) -> StubError {
        match self.code {
            ErrorKind::Grammar(err) => err,
            ErrorKind::Nom(_) => match self.input.first() {
                Some(token) => unexpected(token),
                None => StubError::Grammar("unexpected end of script".to_string()),
            },
        }
    }
}

/// Stop parsing with `err`, no backtracking.
fn failure(input: &[Token], err: impl Into<StubError>) -> nom::Err<NomError<'_>> {
    nom::Err::Failure(NomError {
        input,
        code: ErrorKind::Grammar(err.into()),
    })
}

fn fail<O>(input: &[Token], err: impl Into<StubError>) -> NomResult<'_, O> {
    Err(failure(input, err))
}

/// One token of the given kind.
fn token<'t>(kind: TokenKind) -> impl FnMut(&'t [Token]) -> NomResult<'t, &'t Token> {
    move |i: &'t [Token]| match i.split_first() {
        Some((first, rest)) if first.kind == kind => Ok((rest, first)),
        _ => Err(nom::Err::Error(nom::error::ParseError::from_error_kind(
            i,
            nom::error::ErrorKind::Tag,
        ))),
    }
}

/// The closing delimiter `text`; anything else is an error.
fn closing<'t>(i: &'t [Token], kind: TokenKind, text: &str) -> NomResult<'t, ()> {
    match i.split_first() {
        Some((first, rest)) if first.kind == kind => Ok((rest, ())),
        Some((first, _)) => fail(i, unexpected(first)),
        None => fail(i, unexpected_end(text)),
    }
}

fn misplaced_bang(i: &[Token]) -> NomResult<'_, Block> {
    let (_, bang) = token(TokenKind::Bang)(i)?;
    fail(
        i,
        StubError::Grammar(format!("bang lines must come before all blocks: {}", bang.line)),
    )
}

/// Give every block its index into the per-connection block states,
/// children before parents.
fn number_blocks(block: &mut Block, next_id: &mut usize) {
    match &mut block.kind {
        BlockKind::List(blocks) | BlockKind::Alternative(blocks) | BlockKind::Parallel(blocks) => {
            for child in blocks {
                number_blocks(child, next_id);
            }
        }
        BlockKind::Optional(inner) | BlockKind::Repeat0(inner) | BlockKind::Repeat1(inner) => {
            number_blocks(inner, next_id);
        }
        BlockKind::Client(_) | BlockKind::Auto(_) | BlockKind::Server(_) => {}
    }
    block.id = *next_id;
    *next_id += 1;
}

/// Assembles the block tree from tokens following the bang lines.
pub(crate) struct BlockParser<'t> {
    tokens: &'t [Token],
    version: PackStreamVersion,
}

impl<'t> BlockParser<'t> {
    pub fn new(tokens: &'t [Token], version: PackStreamVersion) -> Self {
        Self { tokens, version }
    }

    /// Parse the whole script body.
    pub fn parse(self) -> StubResult<Block> {
        let blocks = match all_consuming(|i: &'t [Token]| self.list(i))(self.tokens) {
            Ok((_, blocks)) => blocks,
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => return Err(e.into_stub_error()),
            Err(nom::Err::Incomplete(_)) => {
                return Err(StubError::Grammar("unexpected end of script".to_string()))
            }
        };
        if blocks.is_empty() {
            return Err(StubError::Grammar("script contains no blocks".to_string()));
        }
        let mut root = Block::new(0, 1, BlockKind::List(blocks));
        number_blocks(&mut root, &mut 0);
        root.check_ambiguity()?;
        Ok(root)
    }

    /// Blocks up to the next separator, closing delimiter or the end.
    fn list(&self, i: &'t [Token]) -> NomResult<'t, Vec<Block>> {
        many0(|i: &'t [Token]| self.block(i))(i)
    }

    fn block(&self, i: &'t [Token]) -> NomResult<'t, Block> {
        alt((
            |i: &'t [Token]| self.client(i),
            |i: &'t [Token]| self.server(i),
            |i: &'t [Token]| self.auto(i),
            |i: &'t [Token]| self.wrapped_auto(i),
            |i: &'t [Token]| self.multi(i),
            |i: &'t [Token]| {
                use TokenKind::{OptionalClose, OptionalOpen};
                self.enclosed(i, OptionalOpen, OptionalClose, "?}", BlockKind::Optional)
            },
            |i: &'t [Token]| {
                use TokenKind::{Repeat0Close, Repeat0Open};
                self.enclosed(i, Repeat0Open, Repeat0Close, "*}", BlockKind::Repeat0)
            },
            |i: &'t [Token]| {
                use TokenKind::{Repeat1Close, Repeat1Open};
                self.enclosed(i, Repeat1Open, Repeat1Close, "+}", BlockKind::Repeat1)
            },
            misplaced_bang,
        ))(i)
    }

    fn client_line(
        &self,
        i: &'t [Token],
        token: &Token,
        auto: bool,
    ) -> Result<ClientLine, nom::Err<NomError<'t>>> {
        ClientLine::parse(token.line.clone(), auto, self.version).map_err(|err| failure(i, err))
    }

    /// Consecutive `C:` lines.
    fn client(&self, i: &'t [Token]) -> NomResult<'t, Block> {
        let (rest, tokens) = many1(token(TokenKind::Client))(i)?;
        let lines = tokens
            .iter()
            .map(|t| self.client_line(i, t, false))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rest, Block::new(0, tokens[0].line.number, BlockKind::Client(lines))))
    }

    /// Consecutive `S:` lines.
    fn server(&self, i: &'t [Token]) -> NomResult<'t, Block> {
        let (rest, tokens) = many1(token(TokenKind::Server))(i)?;
        let lines = tokens
            .iter()
            .map(|t| ServerLine::parse(t.line.clone(), self.version).map_err(|err| failure(i, err)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rest, Block::new(0, tokens[0].line.number, BlockKind::Server(lines))))
    }

    fn auto(&self, i: &'t [Token]) -> NomResult<'t, Block> {
        let (rest, auto) = token(TokenKind::Auto)(i)?;
        let line = self.client_line(i, auto, true)?;
        Ok((rest, Block::new(0, auto.line.number, BlockKind::Auto(line))))
    }

    /// `?:`, `*:` and `+:` lines: an auto line inside an optional or
    /// repeated block.
    fn wrapped_auto(&self, i: &'t [Token]) -> NomResult<'t, Block> {
        let (rest, auto) = alt((
            token(TokenKind::AutoOptional),
            token(TokenKind::AutoRepeat0),
            token(TokenKind::AutoRepeat1),
        ))(i)?;
        let number = auto.line.number;
        let line = self.client_line(i, auto, true)?;
        let inner = Box::new(Block::new(
            0,
            number,
            BlockKind::List(vec![Block::new(0, number, BlockKind::Auto(line))]),
        ));
        let kind = match auto.kind {
            TokenKind::AutoOptional => BlockKind::Optional(inner),
            TokenKind::AutoRepeat0 => BlockKind::Repeat0(inner),
            _ => BlockKind::Repeat1(inner),
        };
        Ok((rest, Block::new(0, number, kind)))
    }

    fn non_empty_list(&self, i: &'t [Token], line_number: usize) -> NomResult<'t, Block> {
        let (rest, blocks) = self.list(i)?;
        if blocks.is_empty() {
            return fail(
                i,
                StubError::Grammar(format!("empty block starting in line {}", line_number)),
            );
        }
        Ok((rest, Block::new(0, line_number, BlockKind::List(blocks))))
    }

    /// `open`, a non-empty block list and `close`.
    fn enclosed(
        &self,
        i: &'t [Token],
        open: TokenKind,
        close: TokenKind,
        text: &str,
        wrap: fn(Box<Block>) -> BlockKind,
    ) -> NomResult<'t, Block> {
        let (i, opening) = token(open)(i)?;
        let number = opening.line.number;
        let (i, inner) = self.non_empty_list(i, number)?;
        let (i, ()) = closing(i, close, text)?;
        Ok((i, Block::new(0, number, wrap(Box::new(inner)))))
    }

    /// `{{ ... }}` with `----` or `++++` separators, or a plain nested list.
    fn multi(&self, i: &'t [Token]) -> NomResult<'t, Block> {
        let (i, opening) = token(TokenKind::MultiOpen)(i)?;
        let number = opening.line.number;
        let (i, first) = self.non_empty_list(i, number)?;
        let (i, more) = many0(|i: &'t [Token]| -> NomResult<'t, (&'t Token, Block)> {
            let (i, separator) = alt((
                token(TokenKind::AlternativeSeparator),
                token(TokenKind::ParallelSeparator),
            ))(i)?;
            let (i, list) = self.non_empty_list(i, separator.line.number)?;
            Ok((i, (separator, list)))
        })(i)?;
        let (rest, ()) = closing(i, TokenKind::MultiClose, "}}")?;

        let kind = more.first().map(|(separator, _)| separator.kind);
        if let Some((mixed, _)) = more.iter().find(|(separator, _)| Some(separator.kind) != kind) {
            return fail(
                i,
                StubError::Grammar(format!(
                    "\"----\" and \"++++\" can't be mixed in one block: {}",
                    mixed.line
                )),
            );
        }
        let mut lists = vec![first];
        lists.extend(more.into_iter().map(|(_, list)| list));
        Ok((
            rest,
            match kind {
                None => lists.remove(0),
                Some(TokenKind::ParallelSeparator) => {
                    Block::new(0, number, BlockKind::Parallel(lists))
                }
                Some(_) => Block::new(0, number, BlockKind::Alternative(lists)),
            },
        ))
    }
}

fn unexpected(token: &Token) -> StubError {
    StubError::Grammar(format!("unexpected \"{}\" in {}", token.line.raw, token.line))
}

fn unexpected_end(expected: &str) -> StubError {
    StubError::Grammar(format!("unexpected end of script, expected \"{}\"", expected))
}

/// Split leading bang lines from the rest of the tokens.
pub(crate) fn bang_lines(tokens: &[Token]) -> StubResult<(Vec<BangLine>, &[Token])> {
    let count = tokens
        .iter()
        .take_while(|t| t.kind == TokenKind::Bang)
        .count();
    let bangs = tokens[..count]
        .iter()
        .map(|t| BangLine::parse(t.line.clone()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((bangs, &tokens[count..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text).unwrap().iter().map(|t| t.kind).collect()
    }

    fn parse_body(text: &str) -> StubResult<Block> {
        let tokens = tokenize(text)?;
        BlockParser::new(&tokens, PackStreamVersion::V1).parse()
    }

    fn shape(block: &Block) -> String {
        let children = || {
            block
                .children()
                .iter()
                .map(shape)
                .collect::<Vec<_>>()
                .join(" ")
        };
        match &block.kind {
            BlockKind::Client(lines) => format!("C{}", lines.len()),
            BlockKind::Auto(_) => "A".to_string(),
            BlockKind::Server(lines) => format!("S{}", lines.len()),
            BlockKind::List(_) => format!("[{}]", children()),
            BlockKind::Alternative(_) => format!("alt({})", children()),
            BlockKind::Parallel(_) => format!("par({})", children()),
            BlockKind::Optional(_) => format!("opt({})", children()),
            BlockKind::Repeat0(_) => format!("rep0({})", children()),
            BlockKind::Repeat1(_) => format!("rep1({})", children()),
        }
    }

    #[test]
    fn test_tokenize_skips_comments_and_blanks() {
        let text = "!: BOLT 4.3\n\n  # comment\nC: HELLO {}\n    S: SUCCESS {}\n";
        assert_eq!(
            kinds(text),
            vec![TokenKind::Bang, TokenKind::Client, TokenKind::Server]
        );
    }

    #[test]
    fn test_continuation_lines() {
        let tokens = tokenize("S: SUCCESS {}\n   RECORD [1]\nC: RUN\nPULL {}").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::Server, TokenKind::Server, TokenKind::Client, TokenKind::Client]
        );
        assert_eq!(tokens[1].line.content, "RECORD [1]");
        assert_eq!(tokens[1].line.number, 2);
    }

    #[rstest]
    #[case("RUN")]
    #[case("!: BOLT 4.3\nRUN")]
    #[case("{{\nRUN")]
    fn test_orphan_line_is_rejected(#[case] text: &str) {
        assert!(matches!(tokenize(text), Err(StubError::Grammar(_))));
    }

    #[test]
    fn test_python_lines_are_rejected() {
        assert!(matches!(tokenize("PY: x = 1"), Err(StubError::Grammar(_))));
    }

    #[rstest]
    #[case("C: A\nC: B\nS: X\nS: Y", "[C2 S2]")]
    #[case("A: A\nA: B", "[A A]")]
    #[case("?: A\n*: B\n+: C", "[opt([A]) rep0([A]) rep1([A])]")]
    #[case("{{\nC: A\n----\nC: B\n}}", "[alt([C1] [C1])]")]
    #[case("{{\nC: A\n++++\nC: B\n++++\nC: C\n}}", "[par([C1] [C1] [C1])]")]
    #[case("C: A\n{{\nC: B\n}}\nC: C", "[C1 [C1] C1]")]
    #[case("{?\nC: A\n?}\n{*\nC: B\n*}\n{+\nC: C\n+}", "[opt([C1]) rep0([C1]) rep1([C1])]")]
    #[case("S: X\n{{\n{?\nC: A\n?}\n----\nC: B\n}}\nC: C", "[S1 alt([opt([C1])] [C1]) C1]")]
    fn test_block_shapes(#[case] text: &str, #[case] expected: &str) {
        assert_eq!(shape(&parse_body(text).unwrap()), expected);
    }

    #[test]
    fn test_block_ids_are_unique() {
        let root = parse_body("{{\nC: A\n----\nC: B\n}}\n?: C").unwrap();
        let mut ids = Vec::new();
        let mut stack = vec![&root];
        while let Some(block) = stack.pop() {
            ids.push(block.id);
            stack.extend(block.children());
        }
        let count = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), count);
    }

    #[test]
    fn test_block_ids_children_first() {
        let root = parse_body("C: A\n{+\nC: B\n+}").unwrap();
        let ids: Vec<usize> = root.children().iter().map(|b| b.id).collect();
        // C: A, then C: B and its list inside the repeat
        assert_eq!(ids, vec![0, 3]);
        assert_eq!(root.children()[1].children()[0].id, 2);
        assert_eq!(root.id, 4);
    }

    #[test]
    fn test_grammar_error_messages() {
        match parse_body("{?\nC: A\n*}") {
            Err(StubError::Grammar(msg)) => assert!(msg.starts_with("unexpected \"*}\""), "{}", msg),
            other => panic!("unexpected result {:?}", other),
        }
        match parse_body("{{\nC: A") {
            Err(StubError::Grammar(msg)) => {
                assert_eq!(msg, "unexpected end of script, expected \"}}\"")
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[rstest]
    #[case("{{\nC: A\n----\nC: B\n++++\nC: C\n}}")]
    #[case("{{\nC: A\n----\nC: B")]
    #[case("{?\nC: A\n*}")]
    #[case("{?\n?}")]
    #[case("C: A\n}}")]
    #[case("C: A\n!: BOLT 4.3")]
    fn test_grammar_errors(#[case] text: &str) {
        assert!(matches!(parse_body(text), Err(StubError::Grammar(_))));
    }

    #[rstest]
    #[case("{*\nC: A\n*}\nS: B")]
    #[case("{?\nS: A\n?}")]
    #[case("{{\nS: A\n----\nC: B\n}}")]
    #[case("{{\nC: B\n++++\nS: A\n}}")]
    fn test_ambiguous_server_lines(#[case] text: &str) {
        match parse_body(text) {
            Err(StubError::Line(err)) => {
                assert!(err.message.contains("ambiguity"));
                assert!(err.line.contains("S: "));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[rstest]
    #[case("{{\nC: A\n----\nC: B\n}}\nS: C")]
    #[case("{*\nC: A\n*}\nC: B")]
    #[case("S: A\nC: B")]
    fn test_unambiguous_server_lines(#[case] text: &str) {
        assert!(parse_body(text).is_ok());
    }

    #[test]
    fn test_bang_lines_split() {
        let tokens = tokenize("!: BOLT 4.3\n!: AUTO HELLO\nC: RUN").unwrap();
        let (bangs, rest) = bang_lines(&tokens).unwrap();
        assert_eq!(bangs.len(), 2);
        assert_eq!(rest.len(), 1);
    }
}
