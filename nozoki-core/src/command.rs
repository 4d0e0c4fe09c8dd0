//! コンソールコマンド

use crate::parse::{parse_count, parse_instance_index, parse_on_off};
use crate::settings::DebuggerBreakMode;

/// 操作対象（メソッドと任意のインスタンス番号）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// メソッドのシグネチャまたは名前
    pub method: String,
    /// `#n` で指定したインスタンス番号（`None` は全インスタンス）
    pub instance: Option<usize>,
}

/// コンソールコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// メソッドを検索
    Find(String),
    /// ブレークポイントを設定
    Attach(Target),
    /// ブレークポイントを解除
    Detach(Target),
    /// ブレークポイントの状態を表示
    Status(Target),
    /// すべてのブレークポイントを解除
    DetachAll,
    /// 監視中のメソッド一覧
    List,
    /// デモのインスタンス一覧
    Instances,
    /// ヒット履歴を表示
    Hits(Option<usize>),
    /// ヒットのコールトレースを表示
    Trace(u64),
    /// 捕捉の有効・無効
    SetEnabled(bool),
    /// デバッガ停止モード
    SetBreak(DebuggerBreakMode),
    /// 履歴の最大保持数
    SetHistory(usize),
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            return None;
        }

        match parts[0] {
            "find" | "f" => {
                if parts.len() > 1 {
                    Some(Command::Find(parts[1..].join(" ")))
                } else {
                    None
                }
            }
            "attach" | "a" | "break" | "b" => parse_target(&parts[1..]).map(Command::Attach),
            "detach" | "d" => parse_target(&parts[1..]).map(Command::Detach),
            "status" | "st" => parse_target(&parts[1..]).map(Command::Status),
            "detach-all" | "da" => Some(Command::DetachAll),
            "list" | "ls" => Some(Command::List),
            "instances" | "i" => Some(Command::Instances),
            "hits" => match parts.get(1) {
                Some(n) => parse_count(n).ok().map(|n| Command::Hits(Some(n))),
                None => Some(Command::Hits(None)),
            },
            "trace" | "bt" => parts
                .get(1)
                .and_then(|s| s.trim_start_matches('#').parse().ok())
                .map(Command::Trace),
            "set" => parse_set(&parts[1..]),
            "help" | "h" | "?" => Some(Command::Help),
            "quit" | "q" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

/// `<method> [#n]` をパースする
///
/// シグネチャには空白が入りうる（`Foo::bar(i32, String)`）ので、
/// 末尾の `#n` 以外はすべてメソッド名として連結します。
fn parse_target(args: &[&str]) -> Option<Target> {
    let (method, instance) = match args.split_last() {
        Some((last, rest)) if last.starts_with('#') => {
            (rest, Some(parse_instance_index(last).ok()?))
        }
        _ => (args, None),
    };
    if method.is_empty() {
        return None;
    }
    Some(Target {
        method: method.join(" "),
        instance,
    })
}

fn parse_set(args: &[&str]) -> Option<Command> {
    match args {
        ["enabled", value] => parse_on_off(value).ok().map(Command::SetEnabled),
        ["break", mode] => mode.parse().ok().map(Command::SetBreak),
        ["history", n] => parse_count(n).ok().map(Command::SetHistory),
        _ => None,
    }
}
