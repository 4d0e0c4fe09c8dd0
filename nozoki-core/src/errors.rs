//! エラーメッセージ定数

use std::any::Any;

/// メソッドが見つからない場合のエラーメッセージ
pub const ERR_METHOD_NOT_FOUND: &str = "Method not found";

/// インスタンスが見つからない場合のエラーメッセージ
pub const ERR_INSTANCE_NOT_FOUND: &str = "Instance not found";

/// フックをインストールできなかった場合のエラーメッセージ
pub const ERR_ATTACH_FAILED: &str = "Could not attach";

/// ヒットが履歴に残っていない場合のエラーメッセージ
pub const ERR_HIT_NOT_FOUND: &str = "Hit not found in history";

/// panic のペイロードからメッセージを取り出す
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
