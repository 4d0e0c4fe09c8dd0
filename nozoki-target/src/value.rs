//! 捕捉値とオブジェクト同一性

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// オブジェクトの参照同一性
///
/// 共有アロケーションのアドレスです。構造的な等価性ではなく、
/// 同じオブジェクトを指しているかどうかだけを表します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub usize);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@0x{:x}", self.0)
    }
}

/// プログラム側オブジェクトへの共有参照
///
/// 比較とハッシュは参照同一性（[`ObjectId`]）のみで行います。
/// フィールドが全く同じ2つのオブジェクトも別物として扱われます。
#[derive(Clone)]
pub struct ObjectRef {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ObjectRef {
    /// 既存の `Arc` からオブジェクト参照を作成する
    pub fn new<T: Any + Send + Sync>(object: Arc<T>) -> Self {
        Self {
            inner: object,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// 参照同一性を取得する
    pub fn id(&self) -> ObjectId {
        ObjectId(Arc::as_ptr(&self.inner) as *const () as usize)
    }

    /// 具象型の名前を取得する
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// 具象型へダウンキャストする
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// 同じオブジェクトを指しているかどうか
    pub fn same_object(&self, other: &ObjectRef) -> bool {
        self.id() == other.id()
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_object(other)
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", short_type_name(self.type_name), self.id())
    }
}

/// フックが捕捉した引数・戻り値
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `()` を返すメソッドの値
    Unit,
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    /// オブジェクト参照（同一性で比較）
    Object(ObjectRef),
    /// 表現できない値。型名だけを保持する
    Opaque { type_name: &'static str },
}

impl Value {
    /// 表現できない値を型名だけで表す
    pub fn opaque<T: ?Sized>() -> Self {
        Value::Opaque {
            type_name: std::any::type_name::<T>(),
        }
    }

    /// オブジェクト参照を取り出す
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(obj) => write!(f, "{:?}", obj),
            Value::Opaque { type_name } => write!(f, "<{}>", short_type_name(type_name)),
        }
    }
}

/// モジュールパスを落とした型名を返す
fn short_type_name(name: &str) -> &str {
    // ジェネリクス引数の中の `::` は残す
    let head = name.split('<').next().unwrap_or(name);
    match head.rfind("::") {
        Some(pos) => &name[pos + 2..],
        None => name,
    }
}

/// 捕捉可能な値への変換
///
/// フックが有効なときだけ呼ばれるので、変換コストは
/// 監視されていない呼び出しには影響しません。
pub trait ToValue {
    fn to_value(&self) -> Value;
}

macro_rules! impl_to_value {
    ($variant:ident as $target:ty: $($ty:ty),+ $(,)?) => {
        $(
            impl ToValue for $ty {
                fn to_value(&self) -> Value {
                    Value::$variant(*self as $target)
                }
            }
        )+
    };
}

impl_to_value!(Int as i64: i8, i16, i32, i64, isize);
impl_to_value!(UInt as u64: u8, u16, u32, u64, usize);
impl_to_value!(Float as f64: f32, f64);

impl ToValue for () {
    fn to_value(&self) -> Value {
        Value::Unit
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::Str(self.to_string())
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }
}

impl ToValue for ObjectRef {
    fn to_value(&self) -> Value {
        Value::Object(self.clone())
    }
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T> ToValue for [T] {
    fn to_value(&self) -> Value {
        Value::opaque::<[T]>()
    }
}

impl<T> ToValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::opaque::<Vec<T>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i32,
    }

    #[test]
    fn test_object_identity_not_structural() {
        let a = ObjectRef::new(Arc::new(Point { x: 1 }));
        let b = ObjectRef::new(Arc::new(Point { x: 1 }));
        let a2 = a.clone();

        // フィールドが同じでも別オブジェクト
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
        assert_eq!(a, a2);
        assert_eq!(a.to_value().as_object(), Some(&a2));
        assert_eq!(a.downcast_ref::<Point>(), Some(&Point { x: 1 }));
    }

    #[test]
    fn test_to_value_conversions() {
        assert_eq!(5i32.to_value(), Value::Int(5));
        assert_eq!(7usize.to_value(), Value::UInt(7));
        assert_eq!("hi".to_value(), Value::Str("hi".to_string()));
        assert_eq!(None::<i64>.to_value(), Value::Null);
        assert_eq!(().to_value(), Value::Unit);
        assert!(matches!(vec![1u8, 2].to_value(), Value::Opaque { .. }));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Str("a".into()).to_string(), "\"a\"");
        assert_eq!(Value::opaque::<std::fs::File>().to_string(), "<File>");
        assert_eq!(Value::Int(-3).to_string(), "-3");
    }
}
