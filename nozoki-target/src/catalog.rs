//! 型カタログ（メソッドの反射情報の検索）

use crate::method::{MethodHandle, MethodInfo};
use crate::Result;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

/// カタログ操作の失敗
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("method `{0}` is already defined")]
    Duplicate(String),
}

/// 型カタログ
///
/// プログラムが定義したメソッドを保持し、シグネチャや名前から
/// 同じ [`MethodHandle`] を何度でも引けるようにします。
pub struct TypeCatalog {
    /// シグネチャ -> ハンドル
    by_signature: RwLock<HashMap<String, MethodHandle>>,
    /// 定義順
    ordered: RwLock<Vec<MethodHandle>>,
}

impl TypeCatalog {
    /// 空のカタログを作成する
    pub fn new() -> Self {
        Self {
            by_signature: RwLock::new(HashMap::new()),
            ordered: RwLock::new(Vec::new()),
        }
    }

    /// メソッドを定義してハンドルを返す
    pub fn define(&self, info: MethodInfo) -> std::result::Result<MethodHandle, CatalogError> {
        let signature = info.signature();
        let mut by_signature = self.by_signature.write();
        if by_signature.contains_key(&signature) {
            return Err(CatalogError::Duplicate(signature));
        }

        let handle = MethodHandle::new(info);
        by_signature.insert(signature, handle.clone());
        self.ordered.write().push(handle.clone());
        Ok(handle)
    }

    /// シグネチャまたは名前からメソッドを解決する
    ///
    /// `Owner::name(p1,p2)` の完全なシグネチャか、オーバーロードのない
    /// `Owner::name` を受け付けます。曖昧な名前は解決しません。
    pub fn resolve(&self, query: &str) -> Option<MethodHandle> {
        let key: String = query.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(handle) = self.by_signature.read().get(&key) {
            return Some(handle.clone());
        }

        let ordered = self.ordered.read();
        let mut candidates = ordered.iter().filter(|m| m.info().qualified_name() == key);
        match (candidates.next(), candidates.next()) {
            (Some(handle), None) => Some(handle.clone()),
            _ => None,
        }
    }

    /// 正規表現にマッチするメソッドを検索する
    pub fn find(&self, pattern: &str) -> Result<Vec<MethodHandle>> {
        let re = Regex::new(pattern)
            .map_err(|e| anyhow::anyhow!("Invalid method pattern '{}': {}", pattern, e))?;
        Ok(self
            .ordered
            .read()
            .iter()
            .filter(|m| re.is_match(&m.info().to_string()))
            .cloned()
            .collect())
    }

    /// 型が宣言しているメソッドを取得する
    pub fn methods_of(&self, owner: &str) -> Vec<MethodHandle> {
        self.ordered
            .read()
            .iter()
            .filter(|m| m.info().owner == owner)
            .cloned()
            .collect()
    }

    /// すべてのメソッドを定義順に取得する
    pub fn all(&self) -> Vec<MethodHandle> {
        self.ordered.read().clone()
    }

    /// メソッドの数
    pub fn len(&self) -> usize {
        self.ordered.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TypeCatalog {
    fn default() -> Self {
        Self::new()
    }
}
