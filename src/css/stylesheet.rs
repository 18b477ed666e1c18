//! CSS stylesheet parsing and rule structures.

use cssparser::{
    AtRuleParser, ParseError, Parser, ParserInput, ParserState, QualifiedRuleParser,
    RuleBodyItemParser, RuleBodyParser, StyleSheetParser,
};

use super::selector::{Selector, Specificity, parse_selector_list};

/// A parsed CSS stylesheet, keeping its source text.
#[derive(Debug, Default, Clone)]
pub struct Stylesheet {
    source: String,
    pub rules: Vec<CssRule>,
}

/// A CSS rule with selectors and declarations.
#[derive(Debug, Clone)]
pub struct CssRule {
    pub selectors: Vec<Selector>,
    pub declarations: Vec<Declaration>,
}

/// One `property: value` pair. Values are kept as lower-cased source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub value: String,
    pub important: bool,
}

/// Origin of a style (for cascade ordering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Origin {
    UserAgent = 0,
    Author = 1,
    Inline = 2,
}

impl Stylesheet {
    /// Parse a CSS stylesheet from a string. Unparseable rules are skipped.
    pub fn parse(css: &str) -> Self {
        let mut input = ParserInput::new(css);
        let mut parser = Parser::new(&mut input);
        let mut rules = Vec::new();

        let mut rule_parser = TopLevelRuleParser { rules: &mut rules };
        let stylesheet_parser = StyleSheetParser::new(&mut parser, &mut rule_parser);

        let mut skipped = 0usize;
        for result in stylesheet_parser {
            if result.is_err() {
                skipped += 1;
            }
        }
        if skipped > 0 {
            log::debug!("Skipped {skipped} unsupported CSS rules");
        }

        Self {
            source: css.to_string(),
            rules,
        }
    }

    /// Parse the body of a `style` attribute.
    pub fn parse_inline(style: &str) -> Vec<Declaration> {
        let mut input = ParserInput::new(style);
        let mut parser = Parser::new(&mut input);
        parse_declarations(&mut parser)
    }

    /// The stylesheet as it is stored in the book.
    pub fn bytes_representation(&self) -> &[u8] {
        self.source.as_bytes()
    }

    /// Source text of the stylesheet.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Check if the stylesheet is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Parser for top-level stylesheet rules.
struct TopLevelRuleParser<'a> {
    rules: &'a mut Vec<CssRule>,
}

impl<'i> AtRuleParser<'i> for TopLevelRuleParser<'_> {
    type Prelude = ();
    type AtRule = ();
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        _name: cssparser::CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        // @media, @font-face, @import and friends play no part in layout flags
        Err(input.new_custom_error(()))
    }
}

impl<'i> QualifiedRuleParser<'i> for TopLevelRuleParser<'_> {
    type Prelude = Vec<Selector>;
    type QualifiedRule = ();
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        parse_selector_list(input)
    }

    fn parse_block<'t>(
        &mut self,
        prelude: Self::Prelude,
        _start: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::QualifiedRule, ParseError<'i, Self::Error>> {
        let declarations = parse_declarations(input);
        if !declarations.is_empty() {
            self.rules.push(CssRule {
                selectors: prelude,
                declarations,
            });
        }
        Ok(())
    }
}

fn parse_declarations(input: &mut Parser<'_, '_>) -> Vec<Declaration> {
    let mut declarations = Vec::new();
    let mut decl_parser = DeclarationListParser {
        declarations: &mut declarations,
    };
    for result in RuleBodyParser::new(input, &mut decl_parser) {
        // Ignore errors - lenient parsing
        let _ = result;
    }
    declarations
}

struct DeclarationListParser<'a> {
    declarations: &'a mut Vec<Declaration>,
}

impl<'i> AtRuleParser<'i> for DeclarationListParser<'_> {
    type Prelude = ();
    type AtRule = ();
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        _name: cssparser::CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        Err(input.new_custom_error(()))
    }
}

impl<'i> QualifiedRuleParser<'i> for DeclarationListParser<'_> {
    type Prelude = ();
    type QualifiedRule = ();
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        Err(input.new_custom_error(()))
    }
}

impl<'i> cssparser::DeclarationParser<'i> for DeclarationListParser<'_> {
    type Declaration = ();
    type Error = ();

    fn parse_value<'t>(
        &mut self,
        name: cssparser::CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
        _start: &ParserState,
    ) -> Result<Self::Declaration, ParseError<'i, Self::Error>> {
        let start = input.position();
        while input.next().is_ok() {}
        let raw = input.slice_from(start).trim().to_ascii_lowercase();

        let (value, important) = match raw.rfind('!') {
            Some(bang) if raw[bang + 1..].trim() == "important" => {
                (raw[..bang].trim().to_string(), true)
            }
            _ => (raw, false),
        };

        if !value.is_empty() {
            self.declarations.push(Declaration {
                name: name.to_ascii_lowercase(),
                value,
                important,
            });
        }
        Ok(())
    }
}

impl<'i> RuleBodyItemParser<'i, (), ()> for DeclarationListParser<'_> {
    fn parse_declarations(&self) -> bool {
        true
    }
    fn parse_qualified(&self) -> bool {
        false
    }
}

/// A declaration matched against one element, with its cascade key.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MatchedDeclaration<'a> {
    pub declaration: &'a Declaration,
    pub origin: Origin,
    pub specificity: Specificity,
    pub order: usize,
}

impl MatchedDeclaration<'_> {
    /// Sort key: importance, then origin, then specificity, then source order.
    pub fn cascade_key(&self) -> (bool, Origin, Specificity, usize) {
        (
            self.declaration.important,
            self.origin,
            self.specificity,
            self.order,
        )
    }
}
