use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, warn};

use super::{
    lexer::{self, Token},
    patterns::{self, CALL_SITE_PATTERNS, LOCAL_NAMES, PARAM_NAMES},
    procedure::{DecipherProcedure, DecipherStep, Primitive},
};
use crate::common::errors::{Error, Result};

/// Stage name and detail of a derivation that did not match.
type Mismatch = (&'static str, String);

/// A call `OBJ.M(p, N)` in the entry function.
struct HelperCall {
    object: String,
    method: String,
    argument: Option<usize>,
}

/// Recovers the signature decipher procedure from a player program by
/// matching its code against known shapes. Anything unexpected fails closed.
pub struct SignatureDecipherDeriver {
    call_sites: Vec<Regex>,
}

impl SignatureDecipherDeriver {
    pub fn new() -> Result<Self> {
        let call_sites = CALL_SITE_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { call_sites })
    }

    pub fn derive(&self, program_text: &str) -> Result<DecipherProcedure> {
        self.derive_versioned("unknown", program_text)
    }

    /// Like [`derive`](Self::derive), tagging failures with the program
    /// version.
    pub fn derive_versioned(&self, version: &str, program_text: &str) -> Result<DecipherProcedure> {
        match self.derive_inner(program_text) {
            Ok(procedure) => {
                debug!("Player {}: decipher procedure {}", version, procedure);
                Ok(procedure)
            }
            Err((stage, detail)) => {
                warn!(
                    "Player {}: signature derivation failed at {}: {}",
                    version, stage, detail
                );
                Err(Error::UnrecognizedProgramFormat {
                    version: version.to_string(),
                    stage,
                    detail,
                })
            }
        }
    }

    fn derive_inner(&self, text: &str) -> std::result::Result<DecipherProcedure, Mismatch> {
        let candidates = self.entry_candidates(text);
        if candidates.is_empty() {
            if has_signature_markers(text) {
                return Err(("entry", "no known call site for the signature function".into()));
            }
            return Ok(DecipherProcedure::identity());
        }

        let (name, param, body) = candidates
            .iter()
            .find_map(|name| find_function(text, name).map(|(p, b)| (name, p, b)))
            .ok_or_else(|| ("entry", format!("definition of {} not found", candidates[0])))?;

        let body_tokens = lexer::tokenize(body).map_err(|e| ("lex", format!("{}: {}", name, e)))?;
        let calls = parse_entry_body(&body_tokens, &param)?;

        let mut helpers: HashMap<String, HashMap<String, Option<Primitive>>> = HashMap::new();
        let mut steps = Vec::with_capacity(calls.len());

        for call in calls {
            if !helpers.contains_key(&call.object) {
                let members = find_helper_object(text, &call.object)?;
                helpers.insert(call.object.clone(), members);
            }

            let primitive = helpers
                .get(&call.object)
                .and_then(|members| members.get(&call.method).copied())
                .ok_or_else(|| ("helper", format!("{}.{} is not defined", call.object, call.method)))?
                .ok_or_else(|| {
                    ("helper", format!("{}.{} has an unrecognized body", call.object, call.method))
                })?;

            let argument = match (primitive, call.argument) {
                (Primitive::Reverse, arg) => arg.unwrap_or(0),
                (_, Some(arg)) => arg,
                (_, None) => {
                    return Err((
                        "call",
                        format!("{}.{} called without an argument", call.object, call.method),
                    ));
                }
            };
            steps.push(DecipherStep { primitive, argument });
        }

        Ok(DecipherProcedure::new(steps))
    }

    fn entry_candidates(&self, text: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for re in &self.call_sites {
            for caps in re.captures_iter(text) {
                if let Some(name) = caps.name("sig") {
                    let name = name.as_str().to_string();
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        names
    }
}

fn has_signature_markers(text: &str) -> bool {
    patterns::SIGNATURE_MARKERS.iter().any(|m| text.contains(m))
        || (patterns::SPLIT_MARKERS.iter().any(|m| text.contains(m))
            && patterns::JOIN_MARKERS.iter().any(|m| text.contains(m)))
}

/// Finds `function NAME(p){...}` or `NAME=function(p){...}` and returns the
/// single parameter and the body between the braces.
fn find_function<'a>(text: &'a str, name: &str) -> Option<(String, &'a str)> {
    let name = regex::escape(name);
    let shapes = [
        format!(r"function\s+{name}\s*\(([^)]*)\)\s*\{{"),
        format!(r"(?:^|[^a-zA-Z0-9$.]){name}\s*=\s*function\s*\(([^)]*)\)\s*\{{"),
    ];

    for shape in &shapes {
        let Ok(re) = Regex::new(shape) else {
            continue;
        };
        for caps in re.captures_iter(text) {
            let (Some(whole), Some(params)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let param = params.as_str().trim();
            if param.is_empty() || param.contains(',') {
                continue;
            }
            let open = whole.end() - 1;
            if let Ok(end) = lexer::block_end(text, open) {
                return Some((param.to_string(), &text[open + 1..end - 1]));
            }
        }
    }
    None
}

fn parse_entry_body(tokens: &[Token], param: &str) -> std::result::Result<Vec<HelperCall>, Mismatch> {
    let statements = lexer::split_top_level(tokens, ';');
    let (Some(first), Some(last)) = (statements.first(), statements.last()) else {
        return Err(("body", "entry function is empty".into()));
    };
    if statements.len() < 2 {
        return Err(("body", "entry function is too short".into()));
    }

    if !is_split(first, param) {
        return Err(("body", format!("expected split, found `{}`", lexer::render(first))));
    }
    if !is_join(last, param) {
        return Err(("body", format!("expected join, found `{}`", lexer::render(last))));
    }

    statements[1..statements.len() - 1]
        .iter()
        .map(|stmt| {
            parse_helper_call(stmt, param)
                .ok_or_else(|| ("body", format!("unexpected statement `{}`", lexer::render(stmt))))
        })
        .collect()
}

/// `p=p.split("")`
fn is_split(stmt: &[Token], param: &str) -> bool {
    matches!(
        stmt,
        [Token::Ident(a), Token::Punct('='), Token::Ident(b), Token::Punct('.'), Token::Ident(f), Token::Punct('('), Token::Str(s), Token::Punct(')')]
            if a == param && b == param && f == "split" && s.is_empty()
    )
}

/// `return p.join("")`
fn is_join(stmt: &[Token], param: &str) -> bool {
    matches!(
        stmt,
        [Token::Ident(r), Token::Ident(a), Token::Punct('.'), Token::Ident(f), Token::Punct('('), Token::Str(s), Token::Punct(')')]
            if r == "return" && a == param && f == "join" && s.is_empty()
    )
}

/// `OBJ.M(p,N)` or `OBJ["M"](p,N)`; the numeric argument is optional.
fn parse_helper_call(stmt: &[Token], param: &str) -> Option<HelperCall> {
    let (object, method, rest) = match stmt {
        [Token::Ident(obj), Token::Punct('.'), Token::Ident(m), rest @ ..] => (obj, m, rest),
        [Token::Ident(obj), Token::Punct('['), Token::Str(m), Token::Punct(']'), rest @ ..] => (obj, m, rest),
        _ => return None,
    };

    if lexer::group_end(rest, 0)? != rest.len() || !rest.first()?.is_punct('(') {
        return None;
    }
    let args = lexer::split_top_level(&rest[1..rest.len() - 1], ',');

    let argument = match args.as_slice() {
        [[Token::Ident(p)]] if p == param => None,
        [[Token::Ident(p)], [Token::Number(n)]] if p == param => Some(n.parse::<usize>().ok()?),
        _ => return None,
    };

    Some(HelperCall {
        object: object.clone(),
        method: method.clone(),
        argument,
    })
}

/// Locates `OBJ={...}` and classifies each method. Members whose body
/// matches no known shape map to `None`.
fn find_helper_object(
    text: &str,
    object: &str,
) -> std::result::Result<HashMap<String, Option<Primitive>>, Mismatch> {
    let re = Regex::new(&format!(
        r"(?:^|[^a-zA-Z0-9$.]){}\s*=\s*\{{",
        regex::escape(object)
    ))
    .map_err(|e| ("helper", e.to_string()))?;

    for m in re.find_iter(text) {
        let open = m.end() - 1;
        let Ok(end) = lexer::block_end(text, open) else {
            continue;
        };
        let tokens = lexer::tokenize(&text[open + 1..end - 1])
            .map_err(|e| ("lex", format!("{}: {}", object, e)))?;
        let members = parse_members(&tokens);
        if !members.is_empty() {
            return Ok(members);
        }
    }

    Err(("helper", format!("helper object {} not found", object)))
}

fn parse_members(tokens: &[Token]) -> HashMap<String, Option<Primitive>> {
    let mut members = HashMap::new();

    for member in lexer::split_top_level(tokens, ',') {
        let (key, rest) = match member {
            [Token::Ident(k) | Token::Str(k), rest @ ..] => (k, rest),
            _ => continue,
        };
        // `key:function(...)` or shorthand `key(...)`
        let rest = match rest {
            [Token::Punct(':'), Token::Ident(f), rest @ ..] if f == "function" => rest,
            [Token::Punct('('), ..] => rest,
            _ => continue,
        };

        let Some(params_end) = lexer::group_end(rest, 0) else {
            continue;
        };
        let params: Vec<String> = lexer::split_top_level(&rest[1..params_end - 1], ',')
            .iter()
            .filter_map(|p| match p {
                [Token::Ident(name)] => Some(name.clone()),
                _ => None,
            })
            .collect();

        let body = &rest[params_end..];
        if lexer::group_end(body, 0) != Some(body.len()) {
            continue;
        }
        let canonical = canonicalize(&params, &body[1..body.len() - 1]);
        members.insert(key.clone(), patterns::classify(&canonical));
    }

    members
}

/// Renames parameters to `a`, `b` and locals to `c`, `d`, ... so bodies can
/// be compared with the shape table regardless of minifier naming.
fn canonicalize(params: &[String], body: &[Token]) -> String {
    let mut names: HashMap<&str, &str> = params
        .iter()
        .zip(PARAM_NAMES)
        .map(|(p, n)| (p.as_str(), *n))
        .collect();

    let mut locals = LOCAL_NAMES.iter();
    for pair in body.windows(2) {
        if let [Token::Ident(kw), Token::Ident(local)] = pair {
            if matches!(kw.as_str(), "var" | "let" | "const") && !names.contains_key(local.as_str()) {
                if let Some(canonical) = locals.next() {
                    names.insert(local.as_str(), *canonical);
                }
            }
        }
    }

    let mut renamed: Vec<Token> = body
        .iter()
        .enumerate()
        .map(|(i, token)| match token {
            Token::Ident(kw) if kw == "let" || kw == "const" => Token::Ident("var".into()),
            Token::Ident(name) if i == 0 || !body[i - 1].is_punct('.') => names
                .get(name.as_str())
                .map_or_else(|| token.clone(), |n| Token::Ident(n.to_string())),
            _ => token.clone(),
        })
        .collect();

    while renamed.last().is_some_and(|t| t.is_punct(';')) {
        renamed.pop();
    }
    lexer::render(&renamed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = r#"
var Xy={Ab:function(a){a.reverse()},
Cd:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c},
Ef:function(a,b){a.splice(0,b)}};
Gh=function(a){a=a.split("");Xy.Cd(a,3);Xy.Ab(a,45);Xy.Ef(a,2);Xy["Cd"](a,9);return a.join("")};
var Qz=function(b,c,d){c&&d.set(b,encodeURIComponent(Gh(decodeURIComponent(c))))};
"#;

    fn deriver() -> SignatureDecipherDeriver {
        SignatureDecipherDeriver::new().unwrap()
    }

    #[test]
    fn derives_recorded_procedure() {
        let procedure = deriver().derive(PROGRAM).unwrap();
        assert_eq!(procedure.to_string(), "swap(3) reverse(45) splice(2) swap(9)");
        assert_eq!(procedure.apply("abcdefghij"), "ghfeacbd");
    }

    #[test]
    fn tolerates_renaming_and_whitespace() {
        let program = r#"
let $k = {
    "r1": function (zz) { zz.reverse(); },
    w2 (q, n) { const t = q[0]; q[0] = q[n % q.length]; q[n] = t; },
    s3: function(q,n){ q.splice( 0, n ) }
};
function Mn$ ( sig ) {
    sig = sig.split( "" ) ;
    $k.w2( sig, 3 ); $k["r1"]( sig ); $k.s3( sig, 2 ) ; $k.w2(sig,9);
    return sig.join( "" )
}
x.sig||Mn$(y);
"#;
        let procedure = deriver().derive(program).unwrap();
        assert_eq!(procedure.to_string(), "swap(3) reverse(0) splice(2) swap(9)");
        assert_eq!(procedure.apply("abcdefghij"), "ghfeacbd");
    }

    #[test]
    fn program_without_markers_is_identity() {
        let procedure = deriver().derive("var a=function(b){return b+1};").unwrap();
        assert!(procedure.is_identity());
    }

    #[test]
    fn markers_without_call_site_fail_closed() {
        let err = deriver()
            .derive_versioned("deadbeef", r#"var q="signature";"#)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnrecognizedProgramFormat { ref version, stage: "entry", .. } if version == "deadbeef"
        ));
    }

    #[test]
    fn unclassified_helper_fails_closed() {
        let program = PROGRAM.replace("a.splice(0,b)", "a.sort(b)");
        let err = deriver().derive(&program).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedProgramFormat { stage: "helper", .. }));
    }

    #[test]
    fn unexpected_statement_fails_closed() {
        let program = PROGRAM.replace("Xy.Ab(a,45);", "Xy.Ab(a,45);a=a.slice(1);");
        let err = deriver().derive(&program).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedProgramFormat { stage: "body", .. }));
    }

    #[test]
    fn missing_helper_object_fails_closed() {
        let program = PROGRAM.replace("var Xy={", "var Yx={");
        let err = deriver().derive(&program).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedProgramFormat { stage: "helper", .. }));
    }

    #[test]
    fn canonical_swap_shape() {
        let tokens = lexer::tokenize("var zz=X[0];X[0]=X[Y%X.length];X[Y%X.length]=zz;").unwrap();
        let canonical = canonicalize(&["X".into(), "Y".into()], &tokens);
        assert_eq!(canonical, "var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c");
    }
}
