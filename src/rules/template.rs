//! Message templates
//!
//! Templates are data: `{key}` placeholders are substituted from a lookup,
//! nothing is evaluated. Supported format specs are the small subset the
//! catalogs use: `{key:.1f}`, `{key:+.2f}`, `{key:,.2f}`, `{key:.1%}` and
//! a bare `{key}`. `{{` and `}}` are literal braces.
//!
//! Rendering is all-or-nothing: an unknown key or unsupported spec yields
//! `None` and the caller picks its fallback.

/// A value that can be substituted into a template
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Number(f64),
    Text(String),
}

impl From<f64> for TemplateValue {
    fn from(v: f64) -> Self {
        TemplateValue::Number(v)
    }
}

impl From<&str> for TemplateValue {
    fn from(v: &str) -> Self {
        TemplateValue::Text(v.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(v: String) -> Self {
        TemplateValue::Text(v)
    }
}

pub fn render<F>(template: &str, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<TemplateValue>,
{
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => return None,
                    }
                }
                let (key, spec) = match field.split_once(':') {
                    Some((k, s)) => (k.trim(), Some(s)),
                    None => (field.trim(), None),
                };
                let value = lookup(key)?;
                out.push_str(&format_value(&value, spec)?);
            }
            '}' => return None,
            other => out.push(other),
        }
    }

    Some(out)
}

/// Render with `template` itself as the fallback.
pub fn render_or_raw<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<TemplateValue>,
{
    render(template, lookup).unwrap_or_else(|| template.to_string())
}

fn format_value(value: &TemplateValue, spec: Option<&str>) -> Option<String> {
    match (value, spec) {
        (TemplateValue::Text(s), None | Some("") | Some("s")) => Some(s.clone()),
        (TemplateValue::Text(_), Some(_)) => None,
        (TemplateValue::Number(v), None | Some("")) => Some(format!("{v}")),
        (TemplateValue::Number(v), Some(spec)) => format_number(*v, spec),
    }
}

fn format_number(value: f64, spec: &str) -> Option<String> {
    let mut rest = spec;

    let force_sign = rest.starts_with('+');
    if force_sign {
        rest = &rest[1..];
    }
    let grouping = rest.starts_with(',');
    if grouping {
        rest = &rest[1..];
    }

    let (precision, kind) = match rest.strip_prefix('.') {
        Some(p) => {
            let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
            let kind = &p[digits.len()..];
            (digits.parse::<usize>().ok()?, kind)
        }
        None => (6, rest),
    };

    let (scaled, suffix) = match kind {
        "f" => (value, ""),
        "%" => (value * 100.0, "%"),
        _ => return None,
    };

    let mut body = format!("{:.*}", precision, scaled.abs());
    if grouping {
        body = group_thousands(&body);
    }

    let sign = if scaled.is_sign_negative() && body.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else if force_sign {
        "+"
    } else {
        ""
    };

    Some(format!("{sign}{body}{suffix}"))
}

fn group_thousands(digits: &str) -> String {
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match frac_part {
        Some(f) => format!("{grouped}.{f}"),
        None => grouped,
    }
}
