//! 主机后端的“编译器”：只做词法层面的检查并找出入口函数。

/// 扫描源码，返回按出现顺序排列的内核入口名。
///
/// 失败时返回构建日志。
pub(super) fn entry_points(src: &str) -> Result<Vec<String>, String> {
    let code = strip_comments(src);
    let mut log = Vec::new();

    for (i, line) in code.lines().enumerate() {
        if let Some(msg) = line.trim_start().strip_prefix("#error") {
            log.push(format!("<source>:{}: error: {}", i + 1, msg.trim()));
        }
    }
    check_brackets(&code, &mut log);

    let tokens = code
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    let mut names = Vec::<String>::new();
    for w in tokens.windows(3) {
        let &[qualifier, "void", name] = w else {
            continue;
        };
        if qualifier != "__kernel" && qualifier != "kernel" {
            continue;
        }
        if names.iter().any(|n| n == name) {
            log.push(format!("<source>: error: redefinition of '{name}'"));
        } else {
            names.push(name.to_string())
        }
    }

    if log.is_empty() {
        Ok(names)
    } else {
        Err(log.join("\n"))
    }
}

/// 把注释替换为空白，保留换行以维持行号。
fn strip_comments(src: &str) -> String {
    enum State {
        Code,
        Line,
        Block,
    }

    let mut ans = String::with_capacity(src.len());
    let mut state = State::Code;
    let mut chars = src.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            State::Code => match (c, chars.peek()) {
                ('/', Some('/')) => {
                    chars.next();
                    ans.push_str("  ");
                    state = State::Line
                }
                ('/', Some('*')) => {
                    chars.next();
                    ans.push_str("  ");
                    state = State::Block
                }
                _ => ans.push(c),
            },
            State::Line => {
                if c == '\n' {
                    ans.push('\n');
                    state = State::Code
                } else {
                    ans.push(' ')
                }
            }
            State::Block => match (c, chars.peek()) {
                ('*', Some('/')) => {
                    chars.next();
                    ans.push_str("  ");
                    state = State::Code
                }
                ('\n', _) => ans.push('\n'),
                _ => ans.push(' '),
            },
        }
    }
    ans
}

fn check_brackets(code: &str, log: &mut Vec<String>) {
    let mut stack = Vec::<(char, usize)>::new();
    let mut line = 1;
    for c in code.chars() {
        match c {
            '\n' => line += 1,
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((top, _)) if top == open => {}
                    Some((top, at)) => {
                        log.push(format!(
                            "<source>:{line}: error: expected closing of '{top}' opened at line {at}, found '{c}'"
                        ));
                        return;
                    }
                    None => {
                        log.push(format!("<source>:{line}: error: unmatched '{c}'"));
                        return;
                    }
                }
            }
            _ => {}
        }
    }
    if let Some((top, at)) = stack.pop() {
        log.push(format!(
            "<source>:{at}: error: '{top}' is not closed at end of input"
        ));
    }
}

#[cfg(test)]
mod test {
    use super::entry_points;
    use crate::kernels::{GAUSSIAN_BLUR, VEC_CALC};

    #[test]
    fn test_entries() {
        assert_eq!(entry_points(VEC_CALC).unwrap(), ["vec_calc"]);
        assert_eq!(entry_points(GAUSSIAN_BLUR).unwrap(), ["gaussian_blur"]);

        let src = "\
// __kernel void commented(int x) {}
kernel void first(global int *x) { x[0] = 1; }
/* __kernel void hidden() {
} */
__kernel void second(global int *x) {}
void helper(void) {}
";
        assert_eq!(entry_points(src).unwrap(), ["first", "second"]);
    }

    #[test]
    fn test_errors() {
        let log = entry_points("__kernel void f() {\n#error missing feature\n}").unwrap_err();
        assert_eq!(log, "<source>:2: error: missing feature");

        let log = entry_points("__kernel void f() {\n  int x = (1;\n}").unwrap_err();
        println!("{log}");
        assert!(log.starts_with("<source>:3: error:"));

        let log = entry_points("__kernel void f() {\n").unwrap_err();
        assert_eq!(log, "<source>:1: error: '{' is not closed at end of input");

        let log = entry_points("__kernel void f() {}\n__kernel void f() {}").unwrap_err();
        assert!(log.contains("redefinition of 'f'"));
    }
}
