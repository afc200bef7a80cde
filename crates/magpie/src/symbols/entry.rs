//
// symbols/entry.rs
//
// Symbol records and declaration classification
//

use crate::analyzer::{Declaration, DeclarationNode, RawVisibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Class,
    Interface,
    Function,
    Variable,
    Module,
    Enum,
    EnumMember,
    Constructor,
    Field,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolVisibility {
    PrivateToDeclaringScope,
    Private,
    Internal,
    Protected,
    Public,
    Unknown,
}

/// A lightweight symbol record held by the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub fq_name: String,
    pub kind: SymbolKind,
    pub visibility: SymbolVisibility,
    /// Type name of the extension/receiver parameter, for extension
    /// functions and properties
    pub extension_receiver: Option<String>,
}

impl SymbolEntry {
    pub fn from_declaration(decl: &Declaration) -> Self {
        Self {
            fq_name: decl.fq_name.clone(),
            kind: symbol_kind(decl),
            visibility: symbol_visibility(decl),
            extension_receiver: extension_receiver(decl),
        }
    }

    pub fn short_name(&self) -> &str {
        self.fq_name.rsplit('.').next().unwrap_or(&self.fq_name)
    }
}

/// Classify a declaration's kind. Independent of the visibility pass.
pub fn symbol_kind(decl: &Declaration) -> SymbolKind {
    match decl.node {
        DeclarationNode::Class => SymbolKind::Class,
        DeclarationNode::Interface => SymbolKind::Interface,
        DeclarationNode::Enum => SymbolKind::Enum,
        DeclarationNode::EnumEntry => SymbolKind::EnumMember,
        DeclarationNode::Function { .. } => SymbolKind::Function,
        DeclarationNode::Constructor => SymbolKind::Constructor,
        // Type aliases behave like variables for lookup purposes.
        DeclarationNode::Variable { .. } | DeclarationNode::TypeAlias => SymbolKind::Variable,
        DeclarationNode::Field => SymbolKind::Field,
        DeclarationNode::Namespace => SymbolKind::Module,
        DeclarationNode::Unknown => SymbolKind::Unknown,
    }
}

/// Classify a declaration's visibility. Independent of the kind pass.
pub fn symbol_visibility(decl: &Declaration) -> SymbolVisibility {
    // Namespaces are always addressable.
    if decl.node == DeclarationNode::Namespace {
        return SymbolVisibility::Public;
    }
    match decl.visibility {
        RawVisibility::PrivateToThis => SymbolVisibility::PrivateToDeclaringScope,
        RawVisibility::Private => SymbolVisibility::Private,
        RawVisibility::Internal => SymbolVisibility::Internal,
        RawVisibility::Protected => SymbolVisibility::Protected,
        RawVisibility::Public => SymbolVisibility::Public,
        RawVisibility::Local | RawVisibility::Unknown => SymbolVisibility::Unknown,
    }
}

/// Extension receiver type name, carried only by functions and variables.
pub fn extension_receiver(decl: &Declaration) -> Option<String> {
    match &decl.node {
        DeclarationNode::Function { receiver } | DeclarationNode::Variable { receiver } => {
            receiver.clone()
        }
        _ => None,
    }
}
